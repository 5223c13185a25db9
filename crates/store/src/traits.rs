//! Coordination contracts.
//!
//! Every implementation must keep the same guarantees regardless of backend:
//! cursors only move up, leases are exclusive per source, rate-limit checks
//! are atomic, reservations are unique per `(source, after_id)`, and inbox /
//! storage writes ignore rows that already exist.

use std::time::Duration;

use async_trait::async_trait;

use sluice_core::{Event, EventId, Payload};

use crate::error::StoreError;
use crate::lease::Lease;
use crate::status::{RequestLogEntry, ReservationId};

/// Per-source `(last_requested_id, last_stored_id)` watermarks.
///
/// Both advance operations are a max-merge: a lower id than the current one
/// is a no-op. A source with no row reads as 0.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn last_requested_id(&self, source_name: &str) -> Result<EventId, StoreError>;

    async fn advance_last_requested_id(&self, source_name: &str, id: EventId) -> Result<(), StoreError>;

    async fn last_stored_id(&self, source_name: &str) -> Result<EventId, StoreError>;

    async fn advance_last_stored_id(&self, source_name: &str, id: EventId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Take a request slot if at least `min_interval` passed since the last one.
    ///
    /// The check and the timestamp update happen atomically per source.
    async fn try_acquire(&self, source_name: &str, min_interval: Duration) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait LeaseManager: Send + Sync {
    /// Non-blocking. `None` means another worker holds the source.
    async fn acquire(&self, source_name: &str, ttl: Duration) -> Result<Option<Lease>, StoreError>;
}

#[async_trait]
pub trait RequestLog: Send + Sync {
    /// `None` when `(source_name, after_id)` is already reserved.
    async fn reserve(
        &self,
        source_name: &str,
        after_id: EventId,
        limit: usize,
    ) -> Result<Option<ReservationId>, StoreError>;

    async fn mark_inbox_only(&self, id: ReservationId, max_id: EventId) -> Result<(), StoreError>;

    async fn mark_succeeded(&self, id: ReservationId, max_id: EventId) -> Result<(), StoreError>;

    /// The row stays, so the same `after_id` cannot be reserved again until cleared.
    async fn mark_failed(&self, id: ReservationId, error: &str) -> Result<(), StoreError>;

    /// Delete the reservation so the pair can be reserved again.
    async fn release(&self, id: ReservationId) -> Result<(), StoreError>;

    async fn find(&self, source_name: &str, after_id: EventId) -> Result<Option<RequestLogEntry>, StoreError>;

    /// Delete failed rows for a source (optionally a single `after_id`). Returns rows removed.
    async fn clear_failed(&self, source_name: &str, after_id: Option<EventId>) -> Result<u64, StoreError>;
}

/// Durable staging area for fetched events.
#[async_trait]
pub trait EventInbox: Send + Sync {
    async fn store_inbox(&self, source_name: &str, events: &[Event]) -> Result<(), StoreError>;
}

/// Final, deduplicated event store.
#[async_trait]
pub trait EventStorage: Send + Sync {
    async fn store(&self, source_name: &str, events: &[Event]) -> Result<(), StoreError>;
}

/// An inbox row claimed by a drain transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxRow {
    pub source_name: String,
    pub event_id: EventId,
    pub payload: Payload,
}

/// Opens transactions over inbox, storage and cursors for the retry worker.
#[async_trait]
pub trait InboxDrain: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn InboxTransaction>, StoreError>;
}

/// One atomic drain pass. Dropping without commit rolls back.
#[async_trait]
pub trait InboxTransaction: Send {
    /// Claim up to `limit` rows ordered by `(source, event_id)`, skipping rows
    /// another open transaction already holds.
    async fn claim_inbox_rows(&mut self, limit: usize) -> Result<Vec<InboxRow>, StoreError>;

    /// Insert-or-ignore into final storage.
    async fn insert_event(&mut self, row: &InboxRow) -> Result<(), StoreError>;

    async fn advance_last_stored_id(&mut self, source_name: &str, id: EventId) -> Result<(), StoreError>;

    async fn delete_inbox_rows(&mut self, source_name: &str, event_ids: &[EventId]) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
