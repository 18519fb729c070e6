//! Line-oriented envelopes used by the `wsgate` binary
//!
//! Events and commands are tagged by the `channel` they travel on, so a
//! single stdin/stdout pair can carry both output channels of the gateway.

use serde::{Deserialize, Serialize};

use crate::messages::{ConnectNotification, Decision, InboundMessage, OutboundCommand};

/// Everything the gateway emits to its consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum HostEvent {
    /// A pending client awaiting a decision
    Connect(ConnectNotification),
    /// A frame from a connected client
    Data(InboundMessage),
}

/// Everything the consumer can send back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum HostCommand {
    Decision(Decision),
    Send(OutboundCommand),
}
