mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use reqchannel::{ChannelState, Error, Message, OpenOptions, TransportProvider};

#[test]
fn test_hello_ten_times() {
    let peer = common::spawn_echo(10);
    let provider = TransportProvider::new();
    let mut channel = provider
        .open(OpenOptions::new(peer.endpoint.clone()))
        .unwrap();

    for i in 0..10 {
        let payload = format!("Hello-{}", i);
        channel.send(payload.as_str()).unwrap();
        assert_eq!(channel.state(), ChannelState::AwaitingReply);
        let reply = channel.receive().unwrap();
        assert_eq!(reply.as_str(), Some(payload.as_str()));
    }
    assert_eq!(channel.state(), ChannelState::ReadyToSend);

    channel.close();
    provider.terminate().unwrap();
    assert_eq!(peer.join(), 10);
}

#[test]
fn test_replies_are_byte_for_byte() {
    let payloads = vec![
        Vec::new(),
        vec![0u8],
        (0..=255u8).collect::<Vec<_>>(),
        (0..65536u32).map(|i| (i % 251) as u8).collect::<Vec<_>>(),
    ];
    let peer = common::spawn_echo(payloads.len());
    let provider = TransportProvider::new();
    let mut channel = provider
        .open(OpenOptions::new(peer.endpoint.clone()))
        .unwrap();

    for payload in &payloads {
        let reply = channel.request(Message::new(payload.clone())).unwrap();
        assert_eq!(reply.as_bytes(), payload.as_slice());
    }
    drop(channel);
    assert_eq!(peer.join(), payloads.len());
}

#[test]
fn test_receive_can_be_retried_after_timeout() {
    let peer = common::spawn_slow_echo(1, Duration::from_millis(300));
    let provider = TransportProvider::new();
    let mut channel = provider
        .open(OpenOptions::new(peer.endpoint.clone()).receive_timeout(Duration::from_millis(50)))
        .unwrap();

    channel.send("Hello-0").unwrap();
    assert!(matches!(channel.receive(), Err(Error::Timeout(_))));
    assert_eq!(channel.state(), ChannelState::AwaitingReply);

    let started = Instant::now();
    let reply = loop {
        match channel.receive() {
            Ok(reply) => break reply,
            Err(Error::Timeout(_)) => assert!(started.elapsed() < Duration::from_secs(5)),
            Err(e) => panic!("unexpected error: {}", e),
        }
    };
    assert_eq!(reply.as_str(), Some("Hello-0"));
    assert_eq!(channel.state(), ChannelState::ReadyToSend);
    assert_eq!(peer.join(), 1);
}

#[test]
fn test_close_unblocks_pending_receive() {
    let (_peer, endpoint) = common::bind_silent();
    let provider = TransportProvider::new();
    let mut channel = provider.open(OpenOptions::new(endpoint)).unwrap();
    channel.send("Hello-0").unwrap();

    let handle = channel.close_handle();
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.close();
    });

    let started = Instant::now();
    assert!(matches!(channel.receive(), Err(Error::ChannelClosed)));
    assert!(started.elapsed() < Duration::from_secs(5));
    closer.join().unwrap();

    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(provider.open_channels(), 0);
    assert!(matches!(channel.send("Hello-1"), Err(Error::ChannelClosed)));
}

#[test]
fn test_multi_frame_reply_is_rejected() {
    let peer = common::spawn_peer(2, |n, request| {
        if n == 0 {
            vec![b"World".to_vec(), b"extra".to_vec()]
        } else {
            request
        }
    });
    let provider = TransportProvider::new();
    let mut channel = provider
        .open(OpenOptions::new(peer.endpoint.clone()))
        .unwrap();

    channel.send("Hello-0").unwrap();
    assert!(matches!(channel.receive(), Err(Error::UnexpectedFrames(2))));
    assert_eq!(channel.state(), ChannelState::ReadyToSend);

    let reply = channel.request("Hello-1").unwrap();
    assert_eq!(reply.as_str(), Some("Hello-1"));
    assert_eq!(peer.join(), 2);
}

#[test]
fn test_connect_timeout_with_live_peer() {
    let peer = common::spawn_echo(1);
    let provider = TransportProvider::new();
    let mut channel = provider
        .open(OpenOptions::new(peer.endpoint.clone()).connect_timeout(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(channel.state(), ChannelState::ReadyToSend);

    let reply = channel.request("Hello-0").unwrap();
    assert_eq!(reply.as_str(), Some("Hello-0"));
    assert_eq!(peer.join(), 1);
}

#[test]
fn test_providers_are_independent() {
    let peer = common::spawn_echo(2);
    let first = TransportProvider::new();
    let second = TransportProvider::new();
    let mut a = first.open(OpenOptions::new(peer.endpoint.clone())).unwrap();
    let mut b = second.open(OpenOptions::new(peer.endpoint.clone())).unwrap();

    assert_eq!(a.request("a").unwrap().as_str(), Some("a"));
    a.close();
    first.terminate().unwrap();

    assert_eq!(second.open_channels(), 1);
    assert_eq!(b.request("b").unwrap().as_str(), Some("b"));
    b.close();
    second.terminate().unwrap();
    assert_eq!(peer.join(), 2);
}

#[test]
fn test_reconnects_after_peer_restart_with_connect_timeout() {
    let peer = common::spawn_echo(1);
    let endpoint = peer.endpoint.clone();
    let provider = TransportProvider::new();
    let mut channel = provider
        .open(
            OpenOptions::new(endpoint.clone())
                .connect_timeout(Duration::from_secs(2))
                .receive_timeout(Duration::from_secs(10)),
        )
        .unwrap();

    assert_eq!(channel.request("a").unwrap().as_str(), Some("a"));
    assert_eq!(peer.join(), 1);

    // Give the channel time to notice the peer is gone and start retrying.
    thread::sleep(Duration::from_millis(500));
    let restarted = common::spawn_peer_at(&endpoint.to_string(), 1, |_, request| request);
    assert_eq!(restarted.endpoint, endpoint);

    assert_eq!(channel.request("b").unwrap().as_str(), Some("b"));
    assert_eq!(restarted.join(), 1);
}

#[test]
fn test_unbounded_connect_timeout_with_live_peer() {
    let peer = common::spawn_echo(1);
    let provider = TransportProvider::new();
    let mut channel = provider
        .open(OpenOptions::new(peer.endpoint.clone()).connect_timeout(Duration::MAX))
        .unwrap();

    assert_eq!(channel.request("Hello-0").unwrap().as_str(), Some("Hello-0"));
    assert_eq!(peer.join(), 1);
}
