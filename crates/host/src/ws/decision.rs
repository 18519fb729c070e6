//! Decision router
//!
//! Resolves a pending session exactly once: reject destroys the raw
//! connection, anything else completes the WebSocket handshake from the
//! stored request and buffered bytes.

use http::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::server::create_response;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use wsgate_protocol::{Decision, DecisionKind};

use crate::error::HandshakeError;
use crate::session::{LiveSocket, PendingHandshake};

use super::relay::run_connection;
use super::upgrade::respond_and_close;
use super::Gateway;

/// What happened to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Unknown client or already resolved; nothing was done
    Dropped,
    Rejected,
    Accepted,
    /// The handshake could not be completed; the session was discarded
    HandshakeFailed,
}

impl Gateway {
    /// Apply an accept/reject decision to a pending client
    ///
    /// Stale or duplicate decisions are dropped silently.
    pub async fn decide(&self, decision: Decision) -> DecisionOutcome {
        let client_id = decision.client_id.as_str();
        match decision.kind() {
            DecisionKind::Reject => match self.registry().take_pending(client_id) {
                Ok(handshake) => {
                    handshake.destroy();
                    tracing::info!(client_id = %client_id, "Upgrade rejected");
                    DecisionOutcome::Rejected
                }
                Err(e) => {
                    tracing::debug!(client_id = %client_id, error = %e, "Dropping reject");
                    DecisionOutcome::Dropped
                }
            },
            DecisionKind::Accept => self.accept(client_id).await,
        }
    }

    async fn accept(&self, client_id: &str) -> DecisionOutcome {
        let (held, cancel) = match self.registry().begin_upgrade(client_id) {
            Ok(taken) => taken,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "Dropping accept");
                return DecisionOutcome::Dropped;
            }
        };

        let completed = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HandshakeError::Cancelled),
            result = async {
                let handshake = held.reclaim().await.ok_or(HandshakeError::Disconnected)?;
                complete_handshake(handshake).await
            } => result,
        };

        let ws = match completed {
            Ok(ws) => ws,
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "Handshake failed");
                self.registry().remove(client_id);
                return DecisionOutcome::HandshakeFailed;
            }
        };

        let (live, endpoint) = LiveSocket::channel();
        if let Err(e) = self.registry().promote(client_id, live) {
            // Torn down while the handshake was being written
            tracing::debug!(client_id = %client_id, error = %e, "Session gone after handshake");
            return DecisionOutcome::HandshakeFailed;
        }

        tracing::info!(client_id = %client_id, "Client connected");
        tokio::spawn(run_connection(
            self.clone(),
            client_id.to_string(),
            ws,
            endpoint,
        ));
        DecisionOutcome::Accepted
    }
}

/// Validate the stored request, answer `101` and wrap the stream
///
/// Bytes the client sent after its request head are replayed into the
/// WebSocket so no early frame is lost.
pub async fn complete_handshake(
    handshake: PendingHandshake,
) -> Result<WebSocketStream<TcpStream>, HandshakeError> {
    let PendingHandshake {
        request,
        mut stream,
        head,
    } = handshake;

    let response = match create_response(&request) {
        Ok(response) => response,
        Err(e) => {
            respond_and_close(&mut stream, StatusCode::BAD_REQUEST).await;
            return Err(e.into());
        }
    };

    stream.write_all(&encode_response(&response)).await?;
    stream.flush().await?;

    Ok(WebSocketStream::from_partially_read(stream, head, Role::Server, None).await)
}

fn encode_response(response: &http::Response<()>) -> Vec<u8> {
    let status = response.status();
    let mut out = format!(
        "{:?} {} {}\r\n",
        response.version(),
        status.as_u16(),
        status.canonical_reason().unwrap_or_default()
    )
    .into_bytes();
    for (name, value) in response.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}
