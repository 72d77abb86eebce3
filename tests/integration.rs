//! Integration tests for sockwire over real loopback TCP.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sockwire::codec::{Framed, MsgPackCodec, RawCodec};
use sockwire::{Client, ConnectionEvent, ConnectionState, DisconnectReason, SockwireError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
struct Ping {
    seq: u32,
    body: String,
}

async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Accept connections forever and echo everything back.
fn spawn_echo_server(listener: TcpListener) {
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
}

async fn wait_for<A: Clone>(
    events: &mut broadcast::Receiver<ConnectionEvent<A>>,
    pred: impl Fn(&ConnectionEvent<A>) -> bool,
) -> ConnectionEvent<A> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_connected<A>(event: &ConnectionEvent<A>) -> bool {
    matches!(event, ConnectionEvent::Connected { .. })
}

/// Typed messages survive framing and MsgPack over a real socket.
#[tokio::test]
async fn test_framed_msgpack_echo() {
    let (listener, addr) = listener().await;
    spawn_echo_server(listener);

    let client = Client::builder(Framed::new(MsgPackCodec::<Ping, Ping>::new()))
        .endpoint(addr)
        .build()
        .unwrap();
    let mut events = client.subscribe();
    client.connect().unwrap();
    wait_for(&mut events, is_connected).await;

    let sent: Vec<Ping> = (0..10)
        .map(|seq| Ping {
            seq,
            body: format!("message {}", seq),
        })
        .collect();
    for ping in &sent {
        client.send(ping).unwrap();
    }

    let mut received = Vec::new();
    while received.len() < sent.len() {
        if let ConnectionEvent::Message { ack, count } =
            wait_for(&mut events, |e| matches!(e, ConnectionEvent::Message { .. })).await
        {
            assert_eq!(ack.len(), count);
            received.extend(ack);
        }
    }
    assert_eq!(received, sent);
    assert_eq!(client.peer_addr(), Some(addr));
    assert!(client.local_addr().is_some());
}

/// Many raw sends arrive complete and in order.
#[tokio::test]
async fn test_ordered_bulk_send() {
    let (listener, addr) = listener().await;
    let client = Client::builder(RawCodec).endpoint(addr).build().unwrap();
    let mut events = client.subscribe();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut data = vec![0u8; 400];
        stream.read_exact(&mut data).await.unwrap();
        data
    });

    client.connect().unwrap();
    wait_for(&mut events, is_connected).await;

    for i in 0..100u32 {
        client.send(&Bytes::copy_from_slice(&i.to_be_bytes())).unwrap();
    }

    let data = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    let values: Vec<u32> = data
        .chunks(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(values, (0..100).collect::<Vec<_>>());
}

/// A server-side close is reported and a later connect recovers.
#[tokio::test]
async fn test_reconnect_after_remote_close() {
    let (listener, addr) = listener().await;
    let client = Client::builder(RawCodec).endpoint(addr).build().unwrap();
    let mut events = client.subscribe();

    let server = tokio::spawn(async move {
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        let (mut second, _) = listener.accept().await.unwrap();
        second.write_all(b"welcome back").await.unwrap();
        second
    });

    client.connect().unwrap();
    wait_for(&mut events, is_connected).await;

    let event = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected(_))).await;
    assert!(matches!(
        event,
        ConnectionEvent::Disconnected(DisconnectReason::RemoteClosed)
    ));
    assert_eq!(client.state(), ConnectionState::Initialized);

    client.connect().unwrap();
    wait_for(&mut events, is_connected).await;
    let event = wait_for(&mut events, |e| matches!(e, ConnectionEvent::Message { .. })).await;
    if let ConnectionEvent::Message { ack, .. } = event {
        assert_eq!(ack.as_ref(), b"welcome back");
    }

    let _stream = server.await.unwrap();
    assert!(client.is_active());
}

/// Retrying against a closed port ends in one ConnectFailed.
#[tokio::test]
async fn test_connect_failed_when_unreachable() {
    let (listener, addr) = listener().await;
    drop(listener);

    let client = Client::builder(RawCodec)
        .endpoint(addr)
        .retry_limit(2)
        .retry_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut events = client.subscribe();
    client.connect().unwrap();

    let event = wait_for(&mut events, |e| matches!(e, ConnectionEvent::ConnectFailed { .. })).await;
    match event {
        ConnectionEvent::ConnectFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_error, Some(std::io::ErrorKind::ConnectionRefused));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.state(), ConnectionState::Initialized);
    assert_eq!(client.retry_count(), 2);
}

/// The listener comes up while the client is already retrying.
#[tokio::test]
async fn test_retry_until_server_appears() {
    let (listener, addr) = listener().await;
    drop(listener);

    let client = Client::builder(RawCodec)
        .endpoint(addr)
        .retry_limit(0)
        .retry_interval(Duration::from_millis(30))
        .build()
        .unwrap();
    let mut events = client.subscribe();
    client.connect().unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(client.state(), ConnectionState::Connecting);
    let listener = TcpListener::bind(addr).await.unwrap();
    spawn_echo_server(listener);

    wait_for(&mut events, is_connected).await;
    assert!(client.is_active());
    assert_eq!(client.retry_count(), 0);
}

#[tokio::test]
async fn test_connect_host_with_ip_literal() {
    let (listener, addr) = listener().await;
    spawn_echo_server(listener);

    let client = Client::builder(RawCodec).build().unwrap();
    let mut events = client.subscribe();
    client.connect_host("127.0.0.1", addr.port()).await.unwrap();

    wait_for(&mut events, is_connected).await;
    assert_eq!(client.endpoint(), Some(addr));
}

#[tokio::test]
async fn test_connect_host_unresolvable() {
    let client = Client::builder(RawCodec).build().unwrap();
    let err = client
        .connect_host("no-such-host.invalid", 80)
        .await
        .unwrap_err();
    assert!(matches!(err, SockwireError::AddressResolution(_)));
    assert_eq!(client.state(), ConnectionState::Initialized);
    assert_eq!(client.endpoint(), None);
}

/// Disposing closes the socket; the server sees end of stream.
#[tokio::test]
async fn test_dispose_closes_socket() {
    let (listener, addr) = listener().await;
    let client = Client::builder(RawCodec).endpoint(addr).build().unwrap();
    let mut events = client.subscribe();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        stream.read(&mut buf).await.unwrap()
    });

    client.connect().unwrap();
    wait_for(&mut events, is_connected).await;
    client.dispose();

    let n = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(client.state(), ConnectionState::Disposed);
}
