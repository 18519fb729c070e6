//! Server lifecycle
//!
//! Shutdown sweeps the whole registry and closes the listener.

use crate::session::ClientSession;

use super::Gateway;

impl Gateway {
    /// Tear down every session and close the listener
    ///
    /// Connected sockets are terminated and pending connections destroyed.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown_token().cancel();

        let sessions = self.registry().close();
        let count = sessions.len();
        sessions.into_iter().for_each(ClientSession::teardown);

        let accept_task = self.shared.accept_task.lock().take();
        if let Some(handle) = accept_task {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Accept loop ended abnormally");
            }
            tracing::info!(sessions = count, "Gateway shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_token().is_cancelled()
    }
}
