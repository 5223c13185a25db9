use std::sync::Arc;

use tracing::info;

use sluice_core::{Event, EventId};
use sluice_store::{CursorStore, EventInbox, EventStorage, RequestLog, ReservationId};

use crate::error::LoadError;
use crate::stores::Stores;
use crate::validator;

/// Moves one fetched batch through inbox, cursors, request log and storage.
///
/// Every step depends on the previous one having succeeded. Nothing is undone
/// on failure: once the inbox write lands, the retry worker can finish the rest.
pub struct EventBatchHandler {
    inbox: Arc<dyn EventInbox>,
    storage: Arc<dyn EventStorage>,
    cursors: Arc<dyn CursorStore>,
    request_log: Arc<dyn RequestLog>,
}

impl EventBatchHandler {
    pub fn new(stores: &Stores) -> Self {
        Self {
            inbox: stores.inbox.clone(),
            storage: stores.storage.clone(),
            cursors: stores.cursors.clone(),
            request_log: stores.request_log.clone(),
        }
    }

    /// Handle a non-empty batch fetched after `after_id`. Returns its max id.
    pub async fn handle(
        &self,
        source_name: &str,
        events: &[Event],
        after_id: EventId,
        request_id: ReservationId,
    ) -> Result<EventId, LoadError> {
        let max_id = validator::max_id(events, after_id, source_name)?;

        self.inbox.store_inbox(source_name, events).await?;
        self.cursors.advance_last_requested_id(source_name, max_id).await?;
        self.request_log.mark_inbox_only(request_id, max_id).await?;

        self.storage.store(source_name, events).await?;
        self.cursors.advance_last_stored_id(source_name, max_id).await?;
        self.request_log.mark_succeeded(request_id, max_id).await?;

        info!(
            source = %source_name,
            count = events.len(),
            after_id,
            last_id = max_id,
            "batch loaded"
        );
        Ok(max_id)
    }
}
