use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgExecutor;

use sluice_core::{Event, EventId, Payload};

use crate::error::StoreError;
use crate::traits::{EventInbox, EventStorage};

use super::PgStore;

/// The two tables sharing the `(source_name, event_id, payload)` shape.
#[derive(Debug, Clone, Copy)]
pub(super) enum EventTable {
    Inbox,
    Events,
}

impl EventTable {
    fn insert_sql(self) -> &'static str {
        match self {
            Self::Inbox => {
                "INSERT INTO event_inbox (source_name, event_id, payload) VALUES ($1, $2, $3) \
                 ON CONFLICT (source_name, event_id) DO NOTHING"
            }
            Self::Events => {
                "INSERT INTO events (source_name, event_id, payload) VALUES ($1, $2, $3) \
                 ON CONFLICT (source_name, event_id) DO NOTHING"
            }
        }
    }
}

/// Insert-or-ignore one row.
pub(super) async fn insert_row<'e, E>(
    executor: E,
    table: EventTable,
    source_name: &str,
    event_id: EventId,
    payload: &Payload,
) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(table.insert_sql())
        .bind(source_name)
        .bind(event_id)
        .bind(Json(payload))
        .execute(executor)
        .await?;
    Ok(())
}

impl PgStore {
    /// Whole batch in one transaction; rows already present are skipped.
    async fn insert_batch(&self, table: EventTable, source_name: &str, events: &[Event]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            insert_row(&mut *tx, table, source_name, event.id(), event.payload()).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl EventInbox for PgStore {
    async fn store_inbox(&self, source_name: &str, events: &[Event]) -> Result<(), StoreError> {
        self.insert_batch(EventTable::Inbox, source_name, events).await
    }
}

#[async_trait]
impl EventStorage for PgStore {
    async fn store(&self, source_name: &str, events: &[Event]) -> Result<(), StoreError> {
        self.insert_batch(EventTable::Events, source_name, events).await
    }
}
