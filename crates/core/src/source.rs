//! Event source contract consumed by the loader.

use async_trait::async_trait;

use crate::error::SourceError;
use crate::event::{Event, EventId};

/// A named, independent, strictly ordered producer of events.
///
/// Implementations wrap a concrete transport (a stream broker, an HTTP feed,
/// a fixture in tests) behind a single "events after id X, limit N" read.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stable source name. Keys the cursor, lease, rate limit and request log.
    fn name(&self) -> &str;

    /// Fetch up to `limit` events with ids strictly greater than `after_id`,
    /// in ascending id order.
    ///
    /// Transient outages must surface as [`SourceError::Unavailable`].
    async fn fetch_events(&self, after_id: EventId, limit: usize) -> Result<Vec<Event>, SourceError>;
}
