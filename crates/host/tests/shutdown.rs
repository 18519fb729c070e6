mod common;

use common::{assert_closed, within, TestGateway};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use wsgate_host::session::SessionState;
use wsgate_host::ws::{DecisionOutcome, DispatchOutcome};
use wsgate_protocol::{Decision, OutboundCommand};

#[tokio::test]
async fn test_shutdown_sweeps_connected_and_pending() {
    let mut gw = TestGateway::start().await;

    let connected = tokio::spawn(connect_async(gw.url("/z")));
    let z = gw.expect_connect().await.client_id;
    gw.gateway.decide(Decision::accept(z.clone())).await;
    let (mut z_ws, _) = within(connected).await.unwrap().unwrap();

    let pending = tokio::spawn(connect_async(gw.url("/w")));
    let w = gw.expect_connect().await.client_id;

    assert_eq!(gw.gateway.registry().state(&z), Some(SessionState::Connected));
    assert_eq!(gw.gateway.registry().state(&w), Some(SessionState::Pending));

    gw.gateway.shutdown().await;

    assert!(gw.gateway.registry().is_empty());
    assert!(gw.gateway.is_shut_down());
    assert_closed(&mut z_ws).await;
    assert!(within(pending).await.unwrap().is_err());

    // Decisions and commands that arrive late are no-ops
    assert_eq!(
        gw.gateway.decide(Decision::accept(w)).await,
        DecisionOutcome::Dropped
    );
    assert_eq!(
        gw.gateway.dispatch(OutboundCommand::send(z, "late")),
        DispatchOutcome::Ignored
    );
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let gw = TestGateway::start().await;
    gw.gateway.shutdown().await;
    gw.gateway.shutdown().await;
    assert!(gw.gateway.registry().is_empty());
}

#[tokio::test]
async fn test_listener_closed_after_shutdown() {
    let gw = TestGateway::start().await;
    let addr = gw.gateway.local_addr();
    gw.gateway.shutdown().await;

    // Either the connect is refused or nothing ever answers
    if let Ok(mut stream) = TcpStream::connect(addr).await {
        let _ = stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
            .await;
        let mut buf = [0u8; 64];
        let n = within(stream.read(&mut buf)).await.unwrap_or(0);
        assert_eq!(n, 0);
    }
    assert!(gw.gateway.registry().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_accept() {
    let mut gw = TestGateway::start().await;
    let client = tokio::spawn(connect_async(gw.url("/slow")));
    let id = gw.expect_connect().await.client_id;

    let accept = gw.gateway.decide(Decision::accept(id.clone()));
    tokio::pin!(accept);
    // The first poll takes the handshake and parks before answering
    assert!(futures::poll!(accept.as_mut()).is_pending());
    assert_eq!(
        gw.gateway.registry().inspect(&id, |s| s.holds_handshake()),
        Some(false)
    );

    gw.gateway.shutdown().await;

    assert_eq!(within(accept).await, DecisionOutcome::HandshakeFailed);
    assert!(gw.gateway.registry().is_empty());
    assert!(within(client).await.unwrap().is_err());
}
