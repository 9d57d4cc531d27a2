#![allow(dead_code)]

use std::{thread, time::Duration};

use reqchannel::Endpoint;

pub struct Peer {
    pub endpoint: Endpoint,
    handle: thread::JoinHandle<zmq::Result<usize>>,
}

impl Peer {
    /// Number of replies the peer sent before exiting.
    pub fn join(self) -> usize {
        self.handle.join().unwrap().unwrap()
    }
}

fn bind_rep(context: &zmq::Context, address: &str) -> (zmq::Socket, Endpoint) {
    let socket = context.socket(zmq::REP).unwrap();
    socket.set_linger(0).unwrap();
    socket.bind(address).unwrap();
    let endpoint = socket.get_last_endpoint().unwrap().unwrap().parse().unwrap();
    (socket, endpoint)
}

/// Answers `replies` requests with whatever `respond` returns for each.
pub fn spawn_peer<F>(replies: usize, respond: F) -> Peer
where
    F: Fn(usize, Vec<Vec<u8>>) -> Vec<Vec<u8>> + Send + 'static,
{
    spawn_peer_at("tcp://127.0.0.1:*", replies, respond)
}

pub fn spawn_peer_at<F>(address: &str, replies: usize, respond: F) -> Peer
where
    F: Fn(usize, Vec<Vec<u8>>) -> Vec<Vec<u8>> + Send + 'static,
{
    let context = zmq::Context::new();
    let (socket, endpoint) = bind_rep(&context, address);
    let handle = thread::spawn(move || {
        for n in 0..replies {
            let request = socket.recv_multipart(0)?;
            socket.send_multipart(respond(n, request), 0)?;
        }
        Ok(replies)
    });
    Peer { endpoint, handle }
}

pub fn spawn_echo(replies: usize) -> Peer {
    spawn_peer(replies, |_, request| request)
}

pub fn spawn_slow_echo(replies: usize, delay: Duration) -> Peer {
    spawn_peer(replies, move |_, request| {
        thread::sleep(delay);
        request
    })
}

/// A bound REP socket that accepts requests and never answers. Keep the
/// socket alive for as long as the peer should exist.
pub fn bind_silent() -> (zmq::Socket, Endpoint) {
    bind_rep(&zmq::Context::new(), "tcp://127.0.0.1:*")
}
