//! Watches a socket's connection events so `open` can wait for the peer.

use std::{
    io::{self, Cursor},
    time::{Duration, Instant},
};

use byteorder::{NativeEndian, ReadBytesExt};
use tracing::{debug, trace};

/// First frame of a monitor notification: event id and event value.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct MonitorEvent {
    pub event: u16,
    pub value: u32,
}

pub(crate) fn decode_event(frame: &[u8]) -> io::Result<MonitorEvent> {
    let mut cursor = Cursor::new(frame);
    let event = cursor.read_u16::<NativeEndian>()?;
    let value = cursor.read_u32::<NativeEndian>()?;
    Ok(MonitorEvent { event, value })
}

pub(crate) struct ConnectMonitor {
    socket: zmq::Socket,
}

impl ConnectMonitor {
    /// Must be attached before `target` connects, or the connect event is lost.
    pub(crate) fn attach(
        context: &zmq::Context,
        target: &zmq::Socket,
        id: u64,
    ) -> zmq::Result<Self> {
        let address = format!("inproc://reqchannel-monitor-{}", id);
        let events = zmq::SocketEvent::CONNECTED.to_raw()
            | zmq::SocketEvent::CONNECT_DELAYED.to_raw()
            | zmq::SocketEvent::CONNECT_RETRIED.to_raw();
        target.monitor(&address, i32::from(events))?;
        let socket = context.socket(zmq::PAIR)?;
        socket.set_linger(0)?;
        socket.connect(&address)?;
        Ok(ConnectMonitor { socket })
    }

    /// `Ok(false)` if `timeout` elapses before the connection is up.
    pub(crate) fn wait_connected(&self, timeout: Duration) -> zmq::Result<bool> {
        let deadline = deadline_after(timeout);
        let mut retries = 0u32;
        loop {
            match self.socket.poll(zmq::POLLIN, deadline.map_or(-1, millis_until)) {
                Ok(0) if deadline.is_some_and(|d| Instant::now() >= d) => {
                    debug!(retries, "gave up waiting for connection");
                    return Ok(false);
                }
                Ok(0) | Err(zmq::Error::EINTR) => continue,
                Ok(_) => {}
                Err(e) => return Err(e),
            }
            let frame = self.socket.recv_bytes(0)?;
            while self.socket.get_rcvmore()? {
                self.socket.recv_bytes(0)?;
            }
            let event = match decode_event(&frame) {
                Ok(event) => event,
                Err(e) => {
                    trace!("ignoring short monitor frame: {}", e);
                    continue;
                }
            };
            if event.event == zmq::SocketEvent::CONNECTED.to_raw() {
                return Ok(true);
            }
            if event.event == zmq::SocketEvent::CONNECT_RETRIED.to_raw() {
                retries += 1;
                trace!(retries, backoff_ms = event.value, "connect retried");
            }
        }
    }

    /// Stops `target` from emitting events. Left running, the unread monitor
    /// stalls the socket's reconnects once the peer goes away.
    pub(crate) fn detach(self, target: &zmq::Socket, id: u64) -> zmq::Result<()> {
        target.monitor(&format!("inproc://reqchannel-monitor-{}-off", id), 0)?;
        drop(self.socket);
        Ok(())
    }
}

/// `None` when `timeout` is too large to express as an instant.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Poll timeout in milliseconds, rounded up so a short wait never spins.
pub(crate) fn millis_until(deadline: Instant) -> i64 {
    let remaining = deadline.saturating_duration_since(Instant::now());
    i64::try_from(remaining.as_micros().div_ceil(1000)).unwrap_or(i64::MAX)
}

#[test]
fn test_decode_event() {
    let mut frame = Vec::new();
    frame.extend_from_slice(&zmq::SocketEvent::CONNECTED.to_raw().to_ne_bytes());
    frame.extend_from_slice(&17u32.to_ne_bytes());
    assert_eq!(
        decode_event(&frame).unwrap(),
        MonitorEvent {
            event: zmq::SocketEvent::CONNECTED.to_raw(),
            value: 17
        }
    );
}

#[test]
fn test_decode_short_frame() {
    assert!(decode_event(&[1, 0, 0]).is_err());
}

#[test]
fn test_millis_until_rounds_up() {
    let deadline = Instant::now() + Duration::from_micros(1500);
    let millis = millis_until(deadline);
    assert!((1..=2).contains(&millis));
    assert_eq!(millis_until(Instant::now() - Duration::from_secs(1)), 0);
}

#[test]
fn test_deadline_after_overflow() {
    assert!(deadline_after(Duration::MAX).is_none());
    assert!(deadline_after(Duration::from_millis(10)).is_some());
}
