//! In-process stream client, used for local runs and tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::client::{StreamClient, StreamMessage, StreamOffset};
use crate::error::StreamError;

/// Holds published messages per stream and serves offset-based reads.
#[derive(Default)]
pub struct InMemoryStreamClient {
    streams: Mutex<HashMap<String, Vec<StreamMessage>>>,
    next_failure: Mutex<Option<StreamError>>,
    last_offsets: Mutex<HashMap<String, StreamOffset>>,
}

impl InMemoryStreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to a stream. Callers keep offsets ascending.
    pub fn publish(&self, stream_name: &str, message: StreamMessage) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stream_name.to_string())
            .or_default()
            .push(message);
    }

    /// Make the next read fail with `error`.
    pub fn fail_next_read(&self, error: StreamError) {
        *self.next_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Offset used by the most recent read of `stream_name`.
    pub fn last_offset(&self, stream_name: &str) -> Option<StreamOffset> {
        self.last_offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream_name)
            .copied()
    }
}

#[async_trait]
impl StreamClient for InMemoryStreamClient {
    async fn read(
        &self,
        stream_name: &str,
        offset: StreamOffset,
        limit: usize,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        self.last_offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream_name.to_string(), offset);

        if let Some(error) = self.next_failure.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(error);
        }

        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(messages) = streams.get(stream_name) else {
            return Ok(Vec::new());
        };

        let start = match offset {
            StreamOffset::First => i64::MIN,
            StreamOffset::At(at) => at,
        };

        Ok(messages
            .iter()
            .filter(|m| m.offset >= start)
            .take(limit)
            .cloned()
            .collect())
    }
}
