//! Transport errors.

use thiserror::Error;

/// Failure on a websocket transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is no longer open.
    #[error("connection closed")]
    Closed,

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Establishing the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),
}

impl TransportError {
    pub fn send(error: impl std::fmt::Display) -> Self {
        Self::Send(error.to_string())
    }

    pub fn receive(error: impl std::fmt::Display) -> Self {
        Self::Receive(error.to_string())
    }

    pub fn connect(error: impl std::fmt::Display) -> Self {
        Self::Connect(error.to_string())
    }
}
