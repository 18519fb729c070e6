//! Outbound dispatcher
//!
//! Fire-and-forget delivery to connected clients. Commands for clients that
//! are unknown, still pending or no longer open are ignored.

use tokio_tungstenite::tungstenite::Message;
use wsgate_protocol::OutboundCommand;

use super::Gateway;

/// What happened to an outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored,
    Sent,
    Terminated,
}

impl Gateway {
    /// Send a frame to, or terminate, a connected client
    pub fn dispatch(&self, command: OutboundCommand) -> DispatchOutcome {
        let client_id = command.client_id.as_str();

        if command.terminate {
            return match self.registry().remove_open(client_id) {
                Some(session) => {
                    session.teardown();
                    tracing::info!(client_id = %client_id, "Client terminated");
                    DispatchOutcome::Terminated
                }
                None => DispatchOutcome::Ignored,
            };
        }

        let frame = Message::Text(command.frame_text());
        match self.registry().with_open_socket(client_id, |live| live.send(frame)) {
            Some(true) => DispatchOutcome::Sent,
            Some(false) | None => {
                tracing::trace!(client_id = %client_id, "Outbound command ignored");
                DispatchOutcome::Ignored
            }
        }
    }
}
