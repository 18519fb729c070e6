//! Inbound frame relay
//!
//! One task per connected client owns the WebSocket. It forwards frames to
//! the consumer, performs queued sends, and retires the session from the
//! registry as soon as the socket is gone.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use wsgate_protocol::{ClientId, HostEvent, InboundMessage};

use crate::session::{SocketCommand, SocketEndpoint};

use super::Gateway;

/// Why a connection task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Peer,
    Error,
    Terminated,
}

/// Map a data frame to the consumer message, ignoring control frames
pub fn inbound_message(client_id: &str, message: Message) -> Option<InboundMessage> {
    match message {
        Message::Text(text) => Some(InboundMessage::from_text(client_id.to_string(), &text)),
        Message::Binary(data) => Some(InboundMessage::from_binary(client_id.to_string(), &data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

pub(crate) async fn run_connection(
    gateway: Gateway,
    client_id: ClientId,
    mut ws: WebSocketStream<TcpStream>,
    mut endpoint: SocketEndpoint,
) {
    let reason = loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break CloseReason::Peer,
                Some(Ok(message)) => {
                    if let Some(inbound) = inbound_message(&client_id, message) {
                        tracing::debug!(client_id = %client_id, "Relaying inbound frame");
                        gateway.emit(HostEvent::Data(inbound));
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(client_id = %client_id, error = %e, "Socket read failed");
                    break CloseReason::Error;
                }
            },
            command = endpoint.commands.recv() => match command {
                Some(SocketCommand::Send(message)) => {
                    if let Err(e) = ws.send(message).await {
                        tracing::debug!(client_id = %client_id, error = %e, "Socket write failed");
                        break CloseReason::Error;
                    }
                }
                Some(SocketCommand::Terminate) | None => break CloseReason::Terminated,
            },
        }
    };

    endpoint.mark_closed();
    gateway.registry().remove(&client_id);

    if reason == CloseReason::Peer {
        // Flush tungstenite's queued close reply; failures mean the peer is gone.
        let _ = ws.close(None).await;
    }
    drop(ws);

    tracing::info!(client_id = %client_id, reason = ?reason, "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_frames_are_parsed() {
        let msg = inbound_message("y", Message::Text(r#"{"a":1}"#.into())).unwrap();
        assert_eq!(msg.client_id, "y");
        assert_eq!(msg.payload, json!({"a": 1}));

        let msg = inbound_message("y", Message::Text("ping".into())).unwrap();
        assert_eq!(msg.payload, json!("ping"));
    }

    #[test]
    fn test_binary_frames_are_relayed() {
        let msg = inbound_message("y", Message::Binary(b"true".to_vec())).unwrap();
        assert_eq!(msg.payload, json!(true));
    }

    #[test]
    fn test_control_frames_are_not_relayed() {
        assert!(inbound_message("y", Message::Ping(vec![1])).is_none());
        assert!(inbound_message("y", Message::Pong(vec![])).is_none());
        assert!(inbound_message("y", Message::Close(None)).is_none());
    }
}
