//! Consumer command stream
//!
//! Commands are applied one at a time in the order they are read. A
//! decision finishes its handshake before the next line is looked at, so a
//! send written right after its accept reaches the new socket.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use wsgate_protocol::HostCommand;

use super::{DecisionOutcome, DispatchOutcome, Gateway};

/// What applying one consumer command did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Decision(DecisionOutcome),
    Dispatch(DispatchOutcome),
}

impl Gateway {
    pub async fn apply(&self, command: HostCommand) -> CommandOutcome {
        match command {
            HostCommand::Decision(decision) => {
                CommandOutcome::Decision(self.decide(decision).await)
            }
            HostCommand::Send(command) => CommandOutcome::Dispatch(self.dispatch(command)),
        }
    }

    /// Apply JSON command lines until EOF
    ///
    /// Malformed lines are logged and skipped.
    pub async fn serve_commands<R>(&self, reader: R) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<HostCommand>(line) {
                Ok(command) => {
                    let outcome = self.apply(command).await;
                    tracing::trace!(outcome = ?outcome, "Command applied");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed command line");
                }
            }
        }
        Ok(())
    }
}
