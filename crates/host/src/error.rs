//! Error types for the gateway
//!
//! Only [`GatewayError::Bind`] is fatal. Everything else is contained to
//! the session it concerns and logged.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by [`crate::ws::Gateway`]
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind upgrade listener on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("listener has no local address: {0}")]
    LocalAddr(#[source] io::Error),
}

/// Errors from [`crate::session::SessionRegistry`] operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown client {0}")]
    UnknownClient(String),

    #[error("client {0} is not in a state that allows this transition")]
    InvalidState(String),

    #[error("client {0} is already registered")]
    DuplicateClient(String),

    #[error("registry is closed")]
    Closed,
}

/// Reasons completing a WebSocket handshake can fail
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("invalid upgrade request: {0}")]
    Protocol(#[from] tungstenite::Error),

    #[error("i/o during handshake: {0}")]
    Io(#[from] io::Error),

    #[error("handshake cancelled by shutdown")]
    Cancelled,

    #[error("peer disconnected before the handshake completed")]
    Disconnected,
}

/// Reasons an upgrade request head could not be read
#[derive(Debug, Error)]
pub enum RequestHeadError {
    #[error("connection closed before request head was complete")]
    Closed,

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request head: {0}")]
    Malformed(String),

    #[error("i/o while reading request head: {0}")]
    Io(#[from] io::Error),
}

impl From<httparse::Error> for RequestHeadError {
    fn from(e: httparse::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

impl From<http::Error> for RequestHeadError {
    fn from(e: http::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// Errors loading [`crate::config::Config`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

