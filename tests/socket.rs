//! Socket lifecycle over a real TCP connection on localhost.

use rfb_core::socket::{Socket, SocketEvent, SocketState, TransportEvent};
use tokio_test::assert_ok;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn connected_socket() -> (
    Socket,
    tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
    tokio::net::TcpStream,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut sock = Socket::new();
    let events = sock.open(&addr.to_string()).await.unwrap();
    let (peer, _) = listener.accept().await.unwrap();
    (sock, events, peer)
}

#[tokio::test]
async fn open_flush_and_receive() {
    let (mut sock, mut events, mut peer) = connected_socket().await;
    assert!(matches!(events.recv().await, Some(TransportEvent::Open)));
    assert_eq!(sock.state(), SocketState::Open);

    // Queue round-trip: pushes coalesce into one big-endian write.
    sock.sq_push8(0x01).unwrap();
    sock.sq_push16(0x0203).unwrap();
    sock.sq_push32(0x04050607).unwrap();
    assert_ok!(sock.flush());

    let mut buf = [0u8; 7];
    peer.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7]);

    // Bytes from the peer surface as a DataReady event.
    peer.write_all(&[0xaa, 0xbb]).await.unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(sock.handle_event(event), Some(SocketEvent::DataReady));
    assert_eq!(sock.rq_shift16(), 0xaabb);
}

#[tokio::test]
async fn peer_close_reaches_the_socket() {
    let (mut sock, mut events, peer) = connected_socket().await;
    assert!(matches!(events.recv().await, Some(TransportEvent::Open)));
    drop(peer);

    loop {
        match events.recv().await {
            Some(event @ TransportEvent::Close { .. }) => {
                match sock.handle_event(event) {
                    Some(SocketEvent::Closed { code, .. }) => {
                        assert_eq!(code, 1000);
                        break;
                    }
                    other => panic!("expected closed event, got {other:?}"),
                }
            }
            Some(other) => {
                sock.handle_event(other);
            }
            None => panic!("event channel ended without close"),
        }
    }
    assert_eq!(sock.state(), SocketState::Unused);
}

#[tokio::test]
async fn close_stops_receive_processing() {
    let (mut sock, mut events, mut peer) = connected_socket().await;
    assert!(matches!(events.recv().await, Some(TransportEvent::Open)));

    sock.close();
    peer.write_all(&[1, 2, 3]).await.unwrap();

    // The message may still arrive on the channel, but the socket
    // discards it: receive processing was detached before the close.
    while let Ok(event) =
        tokio::time::timeout(std::time::Duration::from_millis(200), events.recv()).await
    {
        match event {
            Some(event) => {
                if let Some(SocketEvent::DataReady) = sock.handle_event(event) {
                    panic!("data processed after close()");
                }
            }
            None => break,
        }
    }
    assert_eq!(sock.rq_len(), 0);
}
