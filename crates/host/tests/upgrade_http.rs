mod common;

use common::{within, TestGateway};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wsgate_host::ws::DecisionOutcome;
use wsgate_protocol::Decision;

async fn read_to_end(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let _ = within(stream.read_to_end(&mut buf)).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read until the end of an HTTP response head
async fn read_response_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = within(stream.read(&mut byte)).await.unwrap();
        assert_ne!(n, 0, "connection closed mid-response");
        buf.push(byte[0]);
    }
    String::from_utf8(buf).unwrap()
}

fn upgrade_head(path: &str, extra: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\
         {extra}\r\n"
    )
}

#[tokio::test]
async fn test_plain_http_is_refused() {
    let gw = TestGateway::start().await;
    let mut stream = TcpStream::connect(gw.gateway.local_addr()).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let response = read_to_end(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 426 "), "{response}");
    assert!(gw.gateway.registry().is_empty());
}

#[tokio::test]
async fn test_raw_backslash_path_is_normalized() {
    let mut gw = TestGateway::start().await;
    let mut stream = TcpStream::connect(gw.gateway.local_addr()).await.unwrap();
    stream
        .write_all(upgrade_head("//foo\\bar//?q=1", "").as_bytes())
        .await
        .unwrap();

    let note = gw.expect_connect().await;
    assert_eq!(note.url_components.pathname, "/foo/bar");
    assert_eq!(note.url_components.href.as_deref(), Some("//foo\\bar//?q=1"));
    assert_eq!(note.url_components.host.as_deref(), Some("localhost"));
    gw.gateway.shutdown().await;
}

#[tokio::test]
async fn test_invalid_handshake_fails_on_accept() {
    let mut gw = TestGateway::start().await;
    let mut stream = TcpStream::connect(gw.gateway.local_addr()).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n\r\n")
        .await
        .unwrap();

    // Any upgrade is surfaced; validity is only checked on accept
    let id = gw.expect_connect().await.client_id;
    assert_eq!(
        gw.gateway.decide(Decision::accept(id.clone())).await,
        DecisionOutcome::HandshakeFailed
    );
    assert!(!gw.gateway.registry().contains(&id));

    let response = read_to_end(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 400 "), "{response}");
}

#[tokio::test]
async fn test_early_frame_is_replayed_after_accept() {
    let mut gw = TestGateway::start().await;
    let mut stream = TcpStream::connect(gw.gateway.local_addr()).await.unwrap();

    // Masked text frame "hi" with an all-zero mask, sent before any answer
    let mut bytes = upgrade_head("/", "").into_bytes();
    bytes.extend_from_slice(&[0x81, 0x82, 0, 0, 0, 0, b'h', b'i']);
    stream.write_all(&bytes).await.unwrap();

    let id = gw.expect_connect().await.client_id;
    assert_eq!(
        gw.gateway.decide(Decision::accept(id.clone())).await,
        DecisionOutcome::Accepted
    );

    let head = read_response_head(&mut stream).await;
    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"), "{head}");
    assert!(head.contains("sec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

    let inbound = gw.expect_data().await;
    assert_eq!(inbound.client_id, id);
    assert_eq!(inbound.payload, json!("hi"));
    gw.gateway.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_before_head_creates_nothing() {
    let gw = TestGateway::start().await;
    let mut stream = TcpStream::connect(gw.gateway.local_addr()).await.unwrap();
    stream.write_all(b"GET / HT").await.unwrap();
    drop(stream);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(gw.gateway.registry().is_empty());
}

#[tokio::test]
async fn test_pending_client_hangup_removes_session() {
    let mut gw = TestGateway::start().await;
    let mut stream = TcpStream::connect(gw.gateway.local_addr()).await.unwrap();
    stream.write_all(upgrade_head("/", "").as_bytes()).await.unwrap();

    let id = gw.expect_connect().await.client_id;
    assert!(gw.gateway.registry().contains(&id));

    drop(stream);
    gw.wait_until(|g| !g.registry().contains(&id)).await;
    assert_eq!(
        gw.gateway.decide(Decision::accept(id)).await,
        DecisionOutcome::Dropped
    );
}
