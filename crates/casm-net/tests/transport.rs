use casm_net::carrier::Carrier;
use casm_net::{
    read_path, write_path, Addr, HandshakeError, InprocCarrier, PeerId, QuicCarrier, Transport,
    TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn inproc_addr(id: u64, address: &str) -> Addr {
    Addr::new(PeerId(id), "inproc", "casm", address)
}

#[tokio::test]
async fn test_dial_and_accept_agree_on_addresses() {
    let scope = CancellationToken::new();
    let transport = Transport::new(Arc::new(InprocCarrier::new()));
    let a = inproc_addr(1, "/a");
    let b = inproc_addr(2, "/b");

    let listener = transport.listen(&scope, &b).await.unwrap();
    let (dialed, accepted) = tokio::join!(transport.dial(&scope, &a, &b), listener.accept(&scope));
    let (dialed, accepted) = (dialed.unwrap(), accepted.unwrap());

    assert_eq!(dialed.local_addr(), &a);
    assert_eq!(dialed.remote_addr(), &b);
    assert_eq!(accepted.local_addr(), &b);
    assert_eq!(accepted.remote_addr(), &a);

    let mut out = dialed.open_stream().await.unwrap();
    write_path(&mut out, "/ping").await.unwrap();
    out.write_all(b"ping").await.unwrap();

    let mut inc = accepted.accept_stream().await.unwrap();
    let path = read_path(&mut inc).await.unwrap();
    let mut inc = inc.with_path(path);
    assert_eq!(inc.path(), "/ping");

    let mut buf = [0u8; 4];
    inc.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");
}

#[tokio::test]
async fn test_stalled_listener_hits_deadline() {
    let scope = CancellationToken::new();
    let carrier = Arc::new(InprocCarrier::new());
    let transport =
        Transport::new(carrier.clone()).with_handshake_timeout(Duration::from_millis(100));
    let b = inproc_addr(2, "/b");

    // accepts the carrier connection but never answers the handshake
    let raw_listener = carrier.listen(&b).await.unwrap();
    let stalled = tokio::spawn(async move {
        let conn = raw_listener.accept().await.unwrap();
        conn.closed().await;
    });

    let res = transport.dial(&scope, &inproc_addr(1, "/a"), &b).await;
    assert!(matches!(
        res,
        Err(TransportError::Handshake(HandshakeError::DeadlineExceeded(_)))
    ));

    tokio::time::timeout(Duration::from_secs(1), stalled)
        .await
        .expect("raw connection left open")
        .unwrap();
}

#[tokio::test]
async fn test_dial_detects_identity_mismatch() {
    let scope = CancellationToken::new();
    let transport = Transport::new(Arc::new(InprocCarrier::new()));
    let listener = transport.listen(&scope, &inproc_addr(2, "/b")).await.unwrap();

    let accept_scope = scope.clone();
    tokio::spawn(async move {
        let _ = listener.accept(&accept_scope).await;
    });

    let res = transport
        .dial(&scope, &inproc_addr(1, "/a"), &inproc_addr(3, "/b"))
        .await;
    match res {
        Err(TransportError::Handshake(HandshakeError::IdentityMismatch { expected, actual })) => {
            assert_eq!(expected, PeerId(3));
            assert_eq!(actual, PeerId(2));
        }
        other => panic!("expected identity mismatch, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_cancelled_scope() {
    let scope = CancellationToken::new();
    scope.cancel();
    let transport = Transport::new(Arc::new(InprocCarrier::new()));

    let res = transport
        .dial(&scope, &inproc_addr(1, "/a"), &inproc_addr(2, "/b"))
        .await;
    assert!(matches!(res, Err(TransportError::Cancelled)));
}

#[tokio::test]
async fn test_closed_listener_is_reported() {
    let scope = CancellationToken::new();
    let transport = Transport::new(Arc::new(InprocCarrier::new()));
    let listener = transport.listen(&scope, &inproc_addr(2, "/b")).await.unwrap();

    listener.close();
    let err = listener.accept(&scope).await.err().unwrap();
    assert!(err.is_listener_closed());
}

#[tokio::test]
async fn test_quic_round_trip() {
    let scope = CancellationToken::new();
    let transport = Transport::new(Arc::new(QuicCarrier::new().unwrap()));
    let a = Addr::new(PeerId(1), "quic", "casm", "127.0.0.1:0");
    let b = Addr::new(PeerId(2), "quic", "casm", "127.0.0.1:0");

    let listener = transport.listen(&scope, &b).await.unwrap();
    let bound = listener.addr().clone();
    assert_ne!(bound.address(), "127.0.0.1:0");

    let server_scope = scope.clone();
    let server = tokio::spawn(async move {
        let conn = listener.accept(&server_scope).await.unwrap();
        assert_eq!(conn.remote_addr().id(), PeerId(1));

        let mut stream = conn.accept_stream().await.unwrap();
        let path = read_path(&mut stream).await.unwrap();
        assert_eq!(path, "/echo");

        let mut msg = Vec::new();
        stream.read_to_end(&mut msg).await.unwrap();
        stream.write_all(&msg).await.unwrap();
        stream.close().await.unwrap();
        conn.closed().await;
    });

    let conn = transport.dial(&scope, &a, &bound).await.unwrap();
    assert_eq!(conn.remote_addr(), &bound);

    let mut stream = conn.open_stream().await.unwrap();
    write_path(&mut stream, "/echo").await.unwrap();
    stream.write_all(b"hello world").await.unwrap();
    stream.shutdown().await.unwrap();

    let mut echoed = Vec::new();
    stream.read_to_end(&mut echoed).await.unwrap();
    assert_eq!(echoed, b"hello world");

    conn.close(casm_net::CLOSE_NORMAL, "done");
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not see the close")
        .unwrap();
}
