//! In-process store with the same contract semantics as [`PgStore`](crate::PgStore).
//!
//! Used by tests and single-process runs. All state sits behind one mutex;
//! no lock is held across an `.await`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use sluice_core::{Event, EventId, Payload};

use crate::error::StoreError;
use crate::lease::{Lease, LeaseHandle};
use crate::status::{RequestLogEntry, RequestStatus, ReservationId};
use crate::traits::{
    CursorStore, EventInbox, EventStorage, InboxDrain, InboxRow, InboxTransaction, LeaseManager,
    RateLimiter, RequestLog,
};

type RowKey = (String, EventId);

#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    last_requested_id: EventId,
    last_stored_id: EventId,
}

pub(crate) struct MemoryLease {
    pub(crate) token: u64,
}

#[derive(Default)]
pub(crate) struct MemoryState {
    cursors: HashMap<String, Cursor>,
    rate_limits: HashMap<String, Instant>,
    pub(crate) leases: HashMap<String, MemoryLease>,
    next_lease_token: u64,
    request_log: BTreeMap<i64, RequestLogEntry>,
    next_reservation_id: i64,
    inbox: BTreeMap<RowKey, Payload>,
    events: BTreeMap<RowKey, Payload>,
    /// Inbox rows claimed by an open drain transaction.
    locked: HashSet<RowKey>,
}

impl MemoryState {
    fn advance_stored(&mut self, source_name: &str, id: EventId) {
        let cursor = self.cursors.entry(source_name.to_string()).or_default();
        cursor.last_stored_id = cursor.last_stored_id.max(id);
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock_state(&self.state)
    }

    pub fn inbox_len(&self) -> usize {
        self.lock().inbox.len()
    }

    pub fn inbox_ids(&self, source_name: &str) -> Vec<EventId> {
        ids_for(&self.lock().inbox, source_name)
    }

    pub fn stored_ids(&self, source_name: &str) -> Vec<EventId> {
        ids_for(&self.lock().events, source_name)
    }

    pub fn stored_payload(&self, source_name: &str, event_id: EventId) -> Option<Payload> {
        self.lock().events.get(&(source_name.to_string(), event_id)).cloned()
    }

    pub fn request_log_entries(&self, source_name: &str) -> Vec<RequestLogEntry> {
        self.lock()
            .request_log
            .values()
            .filter(|e| e.source_name == source_name)
            .cloned()
            .collect()
    }

    fn transition(
        &self,
        id: ReservationId,
        to: RequestStatus,
        max_id: Option<EventId>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let entry = state
            .request_log
            .get_mut(&id.0)
            .filter(|e| e.status.can_transition_to(to))
            .ok_or(StoreError::InvalidTransition { id, to })?;

        entry.status = to;
        if let Some(max_id) = max_id {
            entry.max_id = Some(max_id);
        }
        if let Some(error) = error {
            entry.error = Some(error.to_string());
        }
        entry.updated_at = Utc::now();
        Ok(())
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ids_for(rows: &BTreeMap<RowKey, Payload>, source_name: &str) -> Vec<EventId> {
    rows.keys()
        .filter(|(source, _)| source == source_name)
        .map(|(_, id)| *id)
        .collect()
}

fn insert_ignore(rows: &mut BTreeMap<RowKey, Payload>, source_name: &str, events: &[Event]) {
    for event in events {
        rows.entry((source_name.to_string(), event.id()))
            .or_insert_with(|| event.payload().clone());
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn last_requested_id(&self, source_name: &str) -> Result<EventId, StoreError> {
        Ok(self
            .lock()
            .cursors
            .get(source_name)
            .map(|c| c.last_requested_id)
            .unwrap_or(0))
    }

    async fn advance_last_requested_id(&self, source_name: &str, id: EventId) -> Result<(), StoreError> {
        let mut state = self.lock();
        let cursor = state.cursors.entry(source_name.to_string()).or_default();
        cursor.last_requested_id = cursor.last_requested_id.max(id);
        Ok(())
    }

    async fn last_stored_id(&self, source_name: &str) -> Result<EventId, StoreError> {
        Ok(self
            .lock()
            .cursors
            .get(source_name)
            .map(|c| c.last_stored_id)
            .unwrap_or(0))
    }

    async fn advance_last_stored_id(&self, source_name: &str, id: EventId) -> Result<(), StoreError> {
        self.lock().advance_stored(source_name, id);
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for MemoryStore {
    async fn try_acquire(&self, source_name: &str, min_interval: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut state = self.lock();
        let last = state.rate_limits.get(source_name).copied();
        match last {
            Some(last) if now.duration_since(last) < min_interval => Ok(false),
            _ => {
                state.rate_limits.insert(source_name.to_string(), now);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl LeaseManager for MemoryStore {
    /// A held lease is freed only by `release` or by dropping it, never by
    /// time; the TTL is unused here.
    async fn acquire(&self, source_name: &str, _ttl: Duration) -> Result<Option<Lease>, StoreError> {
        let mut state = self.lock();
        if state.leases.contains_key(source_name) {
            return Ok(None);
        }

        state.next_lease_token += 1;
        let token = state.next_lease_token;
        state
            .leases
            .insert(source_name.to_string(), MemoryLease { token });
        drop(state);

        Ok(Some(Lease::new(
            source_name,
            LeaseHandle::Memory {
                state: Arc::clone(&self.state),
                token,
            },
        )))
    }
}

#[async_trait]
impl RequestLog for MemoryStore {
    async fn reserve(
        &self,
        source_name: &str,
        after_id: EventId,
        limit: usize,
    ) -> Result<Option<ReservationId>, StoreError> {
        let mut state = self.lock();
        let taken = state
            .request_log
            .values()
            .any(|e| e.source_name == source_name && e.after_id == after_id);
        if taken {
            return Ok(None);
        }

        state.next_reservation_id += 1;
        let id = ReservationId(state.next_reservation_id);
        state.request_log.insert(
            id.0,
            RequestLogEntry {
                id,
                source_name: source_name.to_string(),
                after_id,
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
                status: RequestStatus::Reserved,
                max_id: None,
                error: None,
                updated_at: Utc::now(),
            },
        );
        Ok(Some(id))
    }

    async fn mark_inbox_only(&self, id: ReservationId, max_id: EventId) -> Result<(), StoreError> {
        self.transition(id, RequestStatus::InboxOnly, Some(max_id), None)
    }

    async fn mark_succeeded(&self, id: ReservationId, max_id: EventId) -> Result<(), StoreError> {
        self.transition(id, RequestStatus::Succeeded, Some(max_id), None)
    }

    async fn mark_failed(&self, id: ReservationId, error: &str) -> Result<(), StoreError> {
        self.transition(id, RequestStatus::Failed, None, Some(error))
    }

    async fn release(&self, id: ReservationId) -> Result<(), StoreError> {
        self.lock().request_log.remove(&id.0);
        Ok(())
    }

    async fn find(&self, source_name: &str, after_id: EventId) -> Result<Option<RequestLogEntry>, StoreError> {
        Ok(self
            .lock()
            .request_log
            .values()
            .find(|e| e.source_name == source_name && e.after_id == after_id)
            .cloned())
    }

    async fn clear_failed(&self, source_name: &str, after_id: Option<EventId>) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let before = state.request_log.len();
        state.request_log.retain(|_, e| {
            let matches = e.source_name == source_name
                && e.status == RequestStatus::Failed
                && after_id.map_or(true, |id| e.after_id == id);
            !matches
        });
        Ok((before - state.request_log.len()) as u64)
    }
}

#[async_trait]
impl EventInbox for MemoryStore {
    async fn store_inbox(&self, source_name: &str, events: &[Event]) -> Result<(), StoreError> {
        insert_ignore(&mut self.lock().inbox, source_name, events);
        Ok(())
    }
}

#[async_trait]
impl EventStorage for MemoryStore {
    async fn store(&self, source_name: &str, events: &[Event]) -> Result<(), StoreError> {
        insert_ignore(&mut self.lock().events, source_name, events);
        Ok(())
    }
}

#[async_trait]
impl InboxDrain for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn InboxTransaction>, StoreError> {
        Ok(Box::new(MemoryInboxTransaction {
            state: Arc::clone(&self.state),
            claimed: Vec::new(),
            inserts: Vec::new(),
            stored: Vec::new(),
            deletes: Vec::new(),
        }))
    }
}

/// Writes are staged and applied on commit. Claimed rows stay in `locked`
/// until the transaction ends either way.
struct MemoryInboxTransaction {
    state: Arc<Mutex<MemoryState>>,
    claimed: Vec<RowKey>,
    inserts: Vec<InboxRow>,
    stored: Vec<(String, EventId)>,
    deletes: Vec<RowKey>,
}

impl MemoryInboxTransaction {
    fn unlock_claimed(&mut self, state: &mut MemoryState) {
        for key in self.claimed.drain(..) {
            state.locked.remove(&key);
        }
    }
}

#[async_trait]
impl InboxTransaction for MemoryInboxTransaction {
    async fn claim_inbox_rows(&mut self, limit: usize) -> Result<Vec<InboxRow>, StoreError> {
        let mut state = lock_state(&self.state);
        let rows: Vec<InboxRow> = state
            .inbox
            .iter()
            .filter(|(key, _)| !state.locked.contains(*key))
            .take(limit)
            .map(|((source_name, event_id), payload)| InboxRow {
                source_name: source_name.clone(),
                event_id: *event_id,
                payload: payload.clone(),
            })
            .collect();

        for row in &rows {
            let key = (row.source_name.clone(), row.event_id);
            state.locked.insert(key.clone());
            self.claimed.push(key);
        }
        Ok(rows)
    }

    async fn insert_event(&mut self, row: &InboxRow) -> Result<(), StoreError> {
        self.inserts.push(row.clone());
        Ok(())
    }

    async fn advance_last_stored_id(&mut self, source_name: &str, id: EventId) -> Result<(), StoreError> {
        self.stored.push((source_name.to_string(), id));
        Ok(())
    }

    async fn delete_inbox_rows(&mut self, source_name: &str, event_ids: &[EventId]) -> Result<(), StoreError> {
        self.deletes
            .extend(event_ids.iter().map(|id| (source_name.to_string(), *id)));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let state = Arc::clone(&self.state);
        let mut state = lock_state(&state);

        for row in self.inserts.drain(..) {
            state
                .events
                .entry((row.source_name, row.event_id))
                .or_insert(row.payload);
        }
        for (source_name, id) in self.stored.drain(..) {
            state.advance_stored(&source_name, id);
        }
        for key in self.deletes.drain(..) {
            state.inbox.remove(&key);
        }
        self.unlock_claimed(&mut state);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let state = Arc::clone(&self.state);
        self.unlock_claimed(&mut lock_state(&state));
        Ok(())
    }
}

impl Drop for MemoryInboxTransaction {
    fn drop(&mut self) {
        if self.claimed.is_empty() {
            return;
        }
        let state = Arc::clone(&self.state);
        self.unlock_claimed(&mut lock_state(&state));
    }
}
