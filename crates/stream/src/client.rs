//! Stream client trait and types.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sluice_core::EventId;

use crate::error::StreamError;

/// Where a stream read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamOffset {
    /// Before the first retained message.
    First,
    /// At an absolute offset (inclusive).
    At(i64),
}

impl StreamOffset {
    /// Offset of the first message after `after_id`. Negative ids read from the start.
    pub fn after(after_id: EventId) -> Self {
        if after_id < 0 {
            Self::First
        } else {
            Self::At(after_id.saturating_add(1))
        }
    }
}

impl fmt::Display for StreamOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::At(offset) => write!(f, "{offset}"),
        }
    }
}

/// A raw message read from a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Broker-assigned stream offset; becomes the event id.
    pub offset: i64,
    /// Raw message body (JSON string).
    pub data: String,
}

impl StreamMessage {
    pub fn new(offset: i64, data: impl Into<String>) -> Self {
        Self {
            offset,
            data: data.into(),
        }
    }
}

/// Trait for stream broker backends.
///
/// A read is bounded both by `limit` and by the backend's read deadline, so it
/// may return fewer messages than requested (or none) on a quiet stream.
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn read(
        &self,
        stream_name: &str,
        offset: StreamOffset,
        limit: usize,
    ) -> Result<Vec<StreamMessage>, StreamError>;
}
