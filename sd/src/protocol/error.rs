//! Protocol error types

use thiserror::Error;

/// Errors produced while decoding coordination messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message on {topic}: {reason}")]
    Malformed { topic: String, reason: String },
}

impl ProtocolError {
    pub fn topic(&self) -> &str {
        match self {
            Self::Malformed { topic, .. } => topic,
        }
    }
}
