//! Drains the inbox into final storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sluice_core::config::RetryConfig;
use sluice_core::EventId;
use sluice_store::{InboxDrain, InboxRow, InboxTransaction, StoreError};

use crate::stores::Stores;

/// Finishes batches the handler left in the inbox.
///
/// Each pass claims rows with skip-locked semantics, so any number of workers
/// can drain in parallel. A pass is all-or-nothing.
pub struct InboxRetryWorker {
    drain: Arc<dyn InboxDrain>,
    config: RetryConfig,
    shutdown: CancellationToken,
}

impl InboxRetryWorker {
    pub fn new(stores: &Stores, config: RetryConfig) -> Self {
        Self {
            drain: stores.drain.clone(),
            config: config.clamped(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub async fn run(&self) {
        info!(batch_size = self.config.batch_size, "inbox retry worker started");

        while !self.shutdown.is_cancelled() {
            if self.run_once().await {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.idle_sleep) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }

        info!("inbox retry worker stopped");
    }

    /// One drain pass. Returns whether any rows were moved; failures roll back
    /// and count as no work.
    pub async fn run_once(&self) -> bool {
        let mut tx = match self.drain.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(error = %e, "could not open drain transaction");
                return false;
            }
        };

        let drained = drain_batch(tx.as_mut(), self.config.batch_size).await;
        match drained {
            Ok(0) => {
                rollback(tx).await;
                false
            }
            Ok(moved) => match tx.commit().await {
                Ok(()) => {
                    info!(count = moved, "inbox events moved to storage");
                    true
                }
                Err(e) => {
                    error!(error = %e, "drain commit failed");
                    false
                }
            },
            Err(e) => {
                error!(error = %e, "drain pass failed, rolling back");
                rollback(tx).await;
                false
            }
        }
    }
}

async fn drain_batch(tx: &mut dyn InboxTransaction, limit: usize) -> Result<usize, StoreError> {
    let rows = tx.claim_inbox_rows(limit).await?;
    if rows.is_empty() {
        return Ok(0);
    }

    for row in &rows {
        tx.insert_event(row).await?;
    }

    for (source_name, (max_id, ids)) in group_by_source(&rows) {
        tx.advance_last_stored_id(source_name, max_id).await?;
        tx.delete_inbox_rows(source_name, &ids).await?;
    }

    Ok(rows.len())
}

async fn rollback(tx: Box<dyn InboxTransaction>) {
    if let Err(e) = tx.rollback().await {
        error!(error = %e, "drain rollback failed");
    }
}

/// Per source: highest event id and every claimed id.
fn group_by_source(rows: &[InboxRow]) -> BTreeMap<&str, (EventId, Vec<EventId>)> {
    let mut groups: BTreeMap<&str, (EventId, Vec<EventId>)> = BTreeMap::new();
    for row in rows {
        let entry = groups
            .entry(row.source_name.as_str())
            .or_insert((row.event_id, Vec::new()));
        entry.0 = entry.0.max(row.event_id);
        entry.1.push(row.event_id);
    }
    groups
}

#[cfg(test)]
mod tests {
    use sluice_core::Payload;

    use super::*;

    fn row(source_name: &str, event_id: EventId) -> InboxRow {
        InboxRow {
            source_name: source_name.to_string(),
            event_id,
            payload: Payload::new(),
        }
    }

    #[test]
    fn test_group_by_source_tracks_max_and_ids() {
        let rows = vec![row("a", 3), row("a", 7), row("b", 2), row("a", 5)];
        let groups = group_by_source(&rows);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["a"], (7, vec![3, 7, 5]));
        assert_eq!(groups["b"], (2, vec![2]));
    }

    #[test]
    fn test_group_by_source_empty() {
        assert!(group_by_source(&[]).is_empty());
    }
}
