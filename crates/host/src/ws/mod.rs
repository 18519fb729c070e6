//! WebSocket upgrade gateway using tokio-tungstenite
//!
//! Holds every upgrade request open until an external consumer decides
//! whether the client may connect, then relays traffic for connected
//! clients by client ID.
//!
//! ## Module Structure
//! - `commands`: ordered application of consumer commands
//! - `protocol`: request-target parsing, path normalization, header capture
//! - `upgrade`: request head reading, pending session creation
//! - `decision`: accept/reject resolution and handshake completion
//! - `relay`: per-connection task, inbound frames and socket closure
//! - `dispatch`: outbound sends and terminate
//! - `lifecycle`: shutdown sweep

mod commands;
mod decision;
mod dispatch;
mod lifecycle;
mod protocol;
mod relay;
mod upgrade;

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wsgate_protocol::HostEvent;

use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::session::SessionRegistry;

// Re-export for external use
pub use commands::CommandOutcome;
pub use decision::{complete_handshake, DecisionOutcome};
pub use dispatch::DispatchOutcome;
pub use protocol::{capture_headers, is_upgrade_request, normalize_path, url_components};
pub use relay::inbound_message;
pub use upgrade::{read_request_head, RequestHead};

/// Notifications for the consumer: connect requests and inbound data
pub type EventReceiver = mpsc::UnboundedReceiver<HostEvent>;

struct Shared {
    registry: Arc<SessionRegistry>,
    events: mpsc::UnboundedSender<HostEvent>,
    shutdown: CancellationToken,
    local_addr: SocketAddr,
    max_header_bytes: usize,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running gateway
///
/// Cheap to clone; every clone drives the same listener and registry.
#[derive(Clone)]
pub struct Gateway {
    shared: Arc<Shared>,
}

impl Gateway {
    /// Bind the upgrade listener with a fresh registry
    pub async fn bind(config: &ServerConfig) -> Result<(Self, EventReceiver), GatewayError> {
        Self::bind_with_registry(config, Arc::new(SessionRegistry::new())).await
    }

    /// Bind the upgrade listener around an existing registry
    ///
    /// Failing to bind is the only fatal gateway error.
    pub async fn bind_with_registry(
        config: &ServerConfig,
        registry: Arc<SessionRegistry>,
    ) -> Result<(Self, EventReceiver), GatewayError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(GatewayError::LocalAddr)?;
        tracing::info!(addr = %local_addr, "Upgrade listener bound");

        let (events, rx) = mpsc::unbounded_channel();
        let gateway = Self {
            shared: Arc::new(Shared {
                registry,
                events,
                shutdown: CancellationToken::new(),
                local_addr,
                max_header_bytes: config.max_header_bytes,
                accept_task: Mutex::new(None),
            }),
        };

        let handle = tokio::spawn(accept_loop(gateway.clone(), listener));
        *gateway.shared.accept_task.lock() = Some(handle);
        Ok((gateway, rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.shared.registry
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shared.shutdown
    }

    pub(crate) fn max_header_bytes(&self) -> usize {
        self.shared.max_header_bytes
    }

    pub(crate) fn emit(&self, event: HostEvent) {
        if self.shared.events.send(event).is_err() {
            tracing::debug!("Consumer gone, event dropped");
        }
    }
}

async fn accept_loop(gateway: Gateway, listener: TcpListener) {
    loop {
        tokio::select! {
            () = gateway.shutdown_token().cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(upgrade::handle_stream(gateway.clone(), stream, peer));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                }
            },
        }
    }
    tracing::debug!(addr = %gateway.local_addr(), "Upgrade listener closed");
}
