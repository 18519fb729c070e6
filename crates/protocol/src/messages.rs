use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque correlation key assigned to every upgrade request
pub type ClientId = String;

/// Marker serialized as the `payload` of a connect notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectEvent {
    #[default]
    #[serde(rename = "connect")]
    Connect,
}

/// Components of the request target captured at upgrade time
///
/// Only components present in the request are serialized. `pathname`
/// is always present and already normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlComponents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Query string including the leading `?`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Query string without the leading `?`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub pathname: String,
    /// Raw path plus search, as it appeared on the request line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// The raw request target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Core -> consumer: a new upgrade request is waiting for a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectNotification {
    pub payload: ConnectEvent,
    #[serde(alias = "_clientid")]
    pub client_id: ClientId,
    /// Lower-cased header names; repeated headers joined with `", "`
    pub headers: BTreeMap<String, String>,
    pub url_components: UrlComponents,
}

impl ConnectNotification {
    pub const fn new(
        client_id: ClientId,
        headers: BTreeMap<String, String>,
        url_components: UrlComponents,
    ) -> Self {
        Self {
            payload: ConnectEvent::Connect,
            client_id,
            headers,
            url_components,
        }
    }
}

/// Interpreted decision payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Accept,
    Reject,
}

/// Consumer -> core: accept or reject a pending client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    #[serde(alias = "_clientid")]
    pub client_id: ClientId,
    #[serde(default)]
    pub payload: Value,
}

impl Decision {
    pub fn accept(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            payload: Value::from("accept"),
        }
    }

    pub fn reject(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            payload: Value::from("reject"),
        }
    }

    /// Only the literal string `"reject"` rejects; every other payload accepts.
    pub fn kind(&self) -> DecisionKind {
        match &self.payload {
            Value::String(s) if s == "reject" => DecisionKind::Reject,
            _ => DecisionKind::Accept,
        }
    }
}

/// Core -> consumer: a frame received from a connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(alias = "_clientid")]
    pub client_id: ClientId,
    pub payload: Value,
}

impl InboundMessage {
    /// Parse the frame as JSON, keeping the raw text when it is not JSON
    pub fn from_text(client_id: ClientId, text: &str) -> Self {
        let payload =
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()));
        Self { client_id, payload }
    }

    /// UTF-8 binary frames are treated as text; anything else is relayed
    /// as an array of byte values.
    pub fn from_binary(client_id: ClientId, data: &[u8]) -> Self {
        match std::str::from_utf8(data) {
            Ok(text) => Self::from_text(client_id, text),
            Err(_) => Self {
                client_id,
                payload: Value::Array(data.iter().map(|b| Value::from(*b)).collect()),
            },
        }
    }
}

/// Consumer -> core: send to or terminate a connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundCommand {
    #[serde(alias = "_clientid")]
    pub client_id: ClientId,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub terminate: bool,
}

impl OutboundCommand {
    pub fn send(client_id: impl Into<ClientId>, payload: impl Into<Value>) -> Self {
        Self {
            client_id: client_id.into(),
            payload: payload.into(),
            terminate: false,
        }
    }

    pub fn terminate(client_id: impl Into<ClientId>) -> Self {
        Self {
            client_id: client_id.into(),
            payload: Value::Null,
            terminate: true,
        }
    }

    /// Text of the frame to send: strings verbatim, everything else as JSON
    pub fn frame_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
