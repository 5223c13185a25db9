//! [`EventSource`] backed by a broker stream.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use sluice_core::{Event, EventId, EventSource, SourceError};

use crate::client::{StreamClient, StreamOffset};
use crate::decode::decode_event;
use crate::error::StreamError;

/// Reads one named stream and exposes it as an ordered event source.
///
/// The stream offset is the event id, so "events after id X" maps to a read
/// starting at offset X + 1.
pub struct StreamEventSource {
    client: Arc<dyn StreamClient>,
    stream_name: String,
    source_name: String,
}

impl StreamEventSource {
    pub fn new(
        client: Arc<dyn StreamClient>,
        stream_name: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
            source_name: source_name.into(),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}

#[async_trait]
impl EventSource for StreamEventSource {
    fn name(&self) -> &str {
        &self.source_name
    }

    async fn fetch_events(&self, after_id: EventId, limit: usize) -> Result<Vec<Event>, SourceError> {
        let offset = StreamOffset::after(after_id);
        debug!(source = %self.source_name, stream = %self.stream_name, %offset, limit, "reading stream");

        let messages = self
            .client
            .read(&self.stream_name, offset, limit)
            .await
            .map_err(|e| match e {
                StreamError::MissingOffset | StreamError::Decode(_) => SourceError::Decode(e.to_string()),
                other => SourceError::unavailable(&self.source_name, format!("stream read failed: {other}")),
            })?;

        messages
            .iter()
            .map(|msg| decode_event(msg).map_err(|e| SourceError::Decode(e.to_string())))
            .collect()
    }
}
