//! Stream client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("missing x-stream-offset header in stream message")]
    MissingOffset,

    #[error("message decode error: {0}")]
    Decode(String),
}

impl StreamError {
    /// Whether the failure is about the message content rather than the transport.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::MissingOffset | Self::Decode(_))
    }
}
