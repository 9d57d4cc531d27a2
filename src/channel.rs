//! Strictly alternating request/reply over one REQ socket. The channel is not
//! `Sync`; close it from other threads through a [`CloseHandle`].

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    endpoint::{Endpoint, Scheme},
    error::{from_transport, ConnectionError, Error, Result},
    message::Message,
    monitor::{deadline_after, millis_until, ConnectMonitor},
    provider::TransportProvider,
};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    ReadyToSend,
    AwaitingReply,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelState::ReadyToSend => "ready-to-send",
            ChannelState::AwaitingReply => "awaiting-reply",
            ChannelState::Closed => "closed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Send,
    Receive,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Send => "send",
            Operation::Receive => "receive",
        })
    }
}

#[derive(Clone, Debug)]
pub struct OpenOptions {
    endpoint: Endpoint,
    receive_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    linger: Duration,
}

impl OpenOptions {
    pub fn new(endpoint: Endpoint) -> Self {
        OpenOptions {
            endpoint,
            receive_timeout: None,
            connect_timeout: None,
            linger: Duration::ZERO,
        }
    }

    /// `None` blocks until a reply arrives.
    pub fn receive_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.receive_timeout = timeout.into();
        self
    }

    /// Wait this long in `open` for the connection to come up. Ignored for
    /// `inproc` endpoints.
    pub fn connect_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

struct CloseSignal {
    closed: AtomicBool,
    waker: Mutex<Option<zmq::Socket>>,
    open_channels: Arc<AtomicUsize>,
}

impl CloseSignal {
    /// True only for the call that actually closed.
    fn fire(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Counted as closed from here; the sockets go once the owner next
        // touches the channel.
        self.open_channels.fetch_sub(1, Ordering::AcqRel);
        if let Some(waker) = self.waker.lock().as_ref() {
            if let Err(e) = waker.send(&b""[..], zmq::DONTWAIT) {
                warn!("failed to wake blocked receive: {}", e);
            }
        }
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn disarm(&self) {
        self.waker.lock().take();
    }
}

/// Closes a [`RequestChannel`] from another thread.
#[derive(Clone)]
pub struct CloseHandle {
    signal: Arc<CloseSignal>,
}

impl CloseHandle {
    pub fn close(&self) {
        if self.signal.fire() {
            debug!("channel closed through handle");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }
}

struct Sockets {
    request: zmq::Socket,
    wake: zmq::Socket,
}

pub struct RequestChannel {
    id: u64,
    endpoint: Endpoint,
    receive_timeout: Option<Duration>,
    state: ChannelState,
    sockets: Option<Sockets>,
    signal: Arc<CloseSignal>,
}

fn linger_millis(linger: Duration) -> i32 {
    i32::try_from(linger.as_millis()).unwrap_or(i32::MAX)
}

impl RequestChannel {
    pub fn open(provider: &TransportProvider, options: OpenOptions) -> Result<Self> {
        let OpenOptions {
            endpoint,
            receive_timeout,
            connect_timeout,
            linger,
        } = options;
        let address = endpoint.to_string();
        let setup = |source: zmq::Error| ConnectionError::Setup {
            endpoint: address.clone(),
            source,
        };

        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let context = provider.context();

        let request = context.socket(zmq::REQ).map_err(setup)?;
        request.set_linger(linger_millis(linger)).map_err(setup)?;

        // Receiving end of the close signal lives next to the request socket
        // so a blocked receive can poll both.
        let wake_address = format!("inproc://reqchannel-wake-{}", id);
        let wake = context.socket(zmq::PAIR).map_err(setup)?;
        wake.set_linger(0).map_err(setup)?;
        wake.bind(&wake_address).map_err(setup)?;
        let waker = context.socket(zmq::PAIR).map_err(setup)?;
        waker.set_linger(0).map_err(setup)?;
        waker.connect(&wake_address).map_err(setup)?;

        let monitor = match connect_timeout {
            Some(timeout) if endpoint.scheme() != Scheme::Inproc => Some((
                ConnectMonitor::attach(context, &request, id).map_err(setup)?,
                timeout,
            )),
            _ => None,
        };

        request
            .connect(&address)
            .map_err(|source| ConnectionError::ConnectFailed {
                endpoint: address.clone(),
                source,
            })?;

        if let Some((monitor, timeout)) = monitor {
            if !monitor.wait_connected(timeout).map_err(setup)? {
                return Err(ConnectionError::Unreachable {
                    endpoint: address.clone(),
                    timeout,
                }
                .into());
            }
            monitor.detach(&request, id).map_err(setup)?;
        }

        let open_channels = provider.channel_counter();
        open_channels.fetch_add(1, Ordering::AcqRel);
        debug!(channel = id, endpoint = %endpoint, "opened request channel");

        Ok(RequestChannel {
            id,
            endpoint,
            receive_timeout,
            state: ChannelState::ReadyToSend,
            sockets: Some(Sockets { request, wake }),
            signal: Arc::new(CloseSignal {
                closed: AtomicBool::new(false),
                waker: Mutex::new(Some(waker)),
                open_channels,
            }),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ChannelState {
        if self.signal.is_closed() {
            ChannelState::Closed
        } else {
            self.state
        }
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            signal: Arc::clone(&self.signal),
        }
    }

    pub fn send(&mut self, message: impl Into<Message>) -> Result<()> {
        let message = message.into();
        self.check(Operation::Send, ChannelState::ReadyToSend)?;
        self.sockets()?
            .request
            .send(message.as_bytes(), 0)
            .map_err(from_transport)?;
        self.state = ChannelState::AwaitingReply;
        trace!(channel = self.id, bytes = message.len(), "sent request");
        Ok(())
    }

    /// Blocks until the reply arrives, the receive timeout elapses or the
    /// channel is closed. On [`Error::Timeout`] the channel keeps waiting for
    /// the same reply, so `receive` may simply be called again.
    pub fn receive(&mut self) -> Result<Message> {
        self.check(Operation::Receive, ChannelState::AwaitingReply)?;
        let deadline = self.receive_timeout.and_then(deadline_after);
        loop {
            let (reply_ready, woken) = self.poll(deadline)?;
            if woken || self.signal.is_closed() {
                self.release();
                return Err(Error::ChannelClosed);
            }
            if reply_ready {
                if let Some(reply) = self.read_reply()? {
                    return Ok(reply);
                }
                continue;
            }
            if let (Some(deadline), Some(timeout)) = (deadline, self.receive_timeout) {
                if Instant::now() >= deadline {
                    warn!(channel = self.id, ?timeout, "no reply before deadline");
                    return Err(Error::Timeout(timeout));
                }
            }
        }
    }

    pub fn request(&mut self, message: impl Into<Message>) -> Result<Message> {
        self.send(message)?;
        self.receive()
    }

    pub fn close(&mut self) {
        if self.signal.fire() {
            debug!(channel = self.id, "closing channel");
        }
        self.release();
    }

    fn check(&mut self, operation: Operation, expected: ChannelState) -> Result<()> {
        if self.signal.is_closed() {
            self.release();
        }
        match self.state {
            ChannelState::Closed => Err(Error::ChannelClosed),
            state if state == expected => Ok(()),
            state => Err(Error::ProtocolViolation { operation, state }),
        }
    }

    fn sockets(&self) -> Result<&Sockets> {
        self.sockets.as_ref().ok_or(Error::ChannelClosed)
    }

    /// Returns (reply readable, close signalled).
    fn poll(&self, deadline: Option<Instant>) -> Result<(bool, bool)> {
        let sockets = self.sockets()?;
        let mut items = [
            sockets.request.as_poll_item(zmq::POLLIN),
            sockets.wake.as_poll_item(zmq::POLLIN),
        ];
        match zmq::poll(&mut items, deadline.map_or(-1, millis_until)) {
            Ok(_) => Ok((items[0].is_readable(), items[1].is_readable())),
            Err(zmq::Error::EINTR) => Ok((false, false)),
            Err(e) => Err(from_transport(e)),
        }
    }

    fn read_reply(&mut self) -> Result<Option<Message>> {
        let sockets = self.sockets()?;
        let payload = match sockets.request.recv_bytes(zmq::DONTWAIT) {
            Ok(payload) => payload,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(from_transport(e)),
        };
        let mut frames = 1;
        while sockets.request.get_rcvmore().map_err(from_transport)? {
            sockets.request.recv_bytes(0).map_err(from_transport)?;
            frames += 1;
        }
        self.state = ChannelState::ReadyToSend;
        if frames > 1 {
            warn!(channel = self.id, frames, "discarded multi-frame reply");
            return Err(Error::UnexpectedFrames(frames));
        }
        trace!(channel = self.id, bytes = payload.len(), "received reply");
        Ok(Some(Message::from(payload)))
    }

    fn release(&mut self) {
        self.state = ChannelState::Closed;
        if let Some(sockets) = self.sockets.take() {
            self.signal.disarm();
            drop(sockets);
            debug!(channel = self.id, "released channel sockets");
        }
    }
}

impl fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannel")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for RequestChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// Nothing listens on port 1, so requests queue and never get answered.
#[cfg(test)]
fn silent_options() -> OpenOptions {
    OpenOptions::new(Endpoint::tcp("127.0.0.1", 1))
}

#[test]
fn test_receive_before_send_is_rejected() {
    let provider = TransportProvider::new();
    let mut channel = provider.open(silent_options()).unwrap();
    assert_eq!(channel.state(), ChannelState::ReadyToSend);
    assert!(matches!(
        channel.receive(),
        Err(Error::ProtocolViolation {
            operation: Operation::Receive,
            state: ChannelState::ReadyToSend
        })
    ));
    assert_eq!(channel.state(), ChannelState::ReadyToSend);
}

#[test]
fn test_second_send_is_rejected() {
    let provider = TransportProvider::new();
    let mut channel = provider.open(silent_options()).unwrap();
    channel.send("Hello").unwrap();
    assert!(matches!(
        channel.send("Hello"),
        Err(Error::ProtocolViolation {
            operation: Operation::Send,
            state: ChannelState::AwaitingReply
        })
    ));
    assert_eq!(channel.state(), ChannelState::AwaitingReply);
}

#[test]
fn test_timeout_keeps_awaiting_reply() {
    let provider = TransportProvider::new();
    let timeout = Duration::from_millis(50);
    let mut channel = provider
        .open(silent_options().receive_timeout(timeout))
        .unwrap();
    channel.send("Hello").unwrap();

    let started = Instant::now();
    assert!(matches!(channel.receive(), Err(Error::Timeout(t)) if t == timeout));
    assert!(started.elapsed() >= timeout);
    assert_eq!(channel.state(), ChannelState::AwaitingReply);

    assert!(matches!(channel.receive(), Err(Error::Timeout(_))));
    assert_eq!(channel.state(), ChannelState::AwaitingReply);
}

#[test]
fn test_close_is_idempotent() {
    let provider = TransportProvider::new();
    let mut channel = provider.open(silent_options()).unwrap();
    assert_eq!(provider.open_channels(), 1);

    for _ in 0..3 {
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(provider.open_channels(), 0);
    }
    assert!(matches!(channel.send("Hello"), Err(Error::ChannelClosed)));
    assert!(matches!(channel.receive(), Err(Error::ChannelClosed)));
}

#[test]
fn test_close_from_any_state() {
    let provider = TransportProvider::new();
    let mut channel = provider.open(silent_options()).unwrap();
    channel.send("Hello").unwrap();
    channel.close();
    assert!(matches!(channel.receive(), Err(Error::ChannelClosed)));
    assert_eq!(provider.open_channels(), 0);
}

#[test]
fn test_handle_close_before_receive() {
    let provider = TransportProvider::new();
    let mut channel = provider.open(silent_options()).unwrap();
    let handle = channel.close_handle();
    channel.send("Hello").unwrap();

    handle.close();
    handle.close();
    assert!(handle.is_closed());
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(matches!(channel.receive(), Err(Error::ChannelClosed)));
    assert_eq!(provider.open_channels(), 0);
}

#[test]
fn test_drop_releases_channel() {
    let provider = TransportProvider::new();
    let channel = provider.open(silent_options()).unwrap();
    assert_eq!(provider.open_channels(), 1);
    drop(channel);
    assert_eq!(provider.open_channels(), 0);
    provider.terminate().unwrap();
}

#[test]
fn test_terminate_refuses_while_channels_open() {
    let provider = TransportProvider::new();
    let channel = provider.open(silent_options()).unwrap();
    assert!(matches!(provider.terminate(), Err(Error::ChannelsOpen(1))));
    drop(channel);
}

#[test]
fn test_connect_timeout_reports_unreachable() {
    let provider = TransportProvider::new();
    let timeout = Duration::from_millis(200);
    let err = provider
        .open(silent_options().connect_timeout(timeout))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::Unreachable { timeout: t, .. }) if t == timeout
    ));
    assert_eq!(provider.open_channels(), 0);
}

#[test]
fn test_handle_close_frees_provider_without_receive() {
    let provider = TransportProvider::new();
    let mut channel = provider.open(silent_options()).unwrap();
    channel.close_handle().close();
    assert_eq!(provider.open_channels(), 0);
    provider.terminate().unwrap();

    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(matches!(channel.send("Hello"), Err(Error::ChannelClosed)));
}

#[test]
fn test_unbounded_receive_timeout() {
    let provider = TransportProvider::new();
    let mut channel = provider
        .open(silent_options().receive_timeout(Duration::MAX))
        .unwrap();
    channel.send("Hello").unwrap();

    let handle = channel.close_handle();
    let closer = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        handle.close();
    });
    assert!(matches!(channel.receive(), Err(Error::ChannelClosed)));
    closer.join().unwrap();
}
