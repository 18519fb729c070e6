//! Common test utilities
#![allow(dead_code)] // Not every helper is used by every test file

use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use wsgate_host::config::ServerConfig;
use wsgate_host::ws::{EventReceiver, Gateway};
use wsgate_protocol::{ConnectNotification, HostEvent, InboundMessage};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A gateway bound to an ephemeral loopback port
pub struct TestGateway {
    pub gateway: Gateway,
    pub events: EventReceiver,
}

impl TestGateway {
    pub async fn start() -> Self {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let (gateway, events) = Gateway::bind(&config).await.expect("bind gateway");
        Self { gateway, events }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.gateway.local_addr())
    }

    pub async fn next_event(&mut self) -> HostEvent {
        within(self.events.recv())
            .await
            .expect("event channel closed")
    }

    pub async fn expect_connect(&mut self) -> ConnectNotification {
        match self.next_event().await {
            HostEvent::Connect(note) => note,
            other => panic!("expected connect, got {other:?}"),
        }
    }

    pub async fn expect_data(&mut self) -> InboundMessage {
        match self.next_event().await {
            HostEvent::Data(msg) => msg,
            other => panic!("expected data, got {other:?}"),
        }
    }

    /// Poll the registry until `cond` holds
    pub async fn wait_until(&self, cond: impl Fn(&Gateway) -> bool) {
        for _ in 0..250 {
            if cond(&self.gateway) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }
}

pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(STEP_TIMEOUT, fut)
        .await
        .expect("step timed out")
}

/// Next data frame as text, skipping control frames
pub async fn next_text(ws: &mut ClientSocket) -> String {
    loop {
        match within(ws.next()).await {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// The server side must have gone away without sending more data
pub async fn assert_closed(ws: &mut ClientSocket) {
    loop {
        match within(ws.next()).await {
            None | Some(Err(_) | Ok(Message::Close(_))) => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(other)) => panic!("unexpected frame after close: {other:?}"),
        }
    }
}
