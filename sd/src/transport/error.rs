//! Transport error types

use thiserror::Error;

/// Errors surfaced by a [`Transport`](super::Transport)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected: {0}")]
    Disconnected(String),

    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("transport closed")]
    Closed,

    #[error("failed to encode payload: {0}")]
    Encode(String),
}

impl TransportError {
    /// Check if a reconnect+resend can help
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Rejected(_))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}
