use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};

use sluice_core::{EventId, Payload};

use crate::error::StoreError;
use crate::traits::{InboxDrain, InboxRow, InboxTransaction};

use super::cursor::advance_stored;
use super::events::{insert_row, EventTable};
use super::PgStore;

/// A retry-worker pass inside one PostgreSQL transaction.
///
/// Claimed rows stay locked (`FOR UPDATE`) until commit or rollback.
pub struct PgInboxTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InboxDrain for PgStore {
    async fn begin(&self) -> Result<Box<dyn InboxTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgInboxTransaction { tx }))
    }
}

#[async_trait]
impl InboxTransaction for PgInboxTransaction {
    async fn claim_inbox_rows(&mut self, limit: usize) -> Result<Vec<InboxRow>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        // SKIP LOCKED: parallel workers partition the inbox instead of queueing on
        // each other, and may see a short (or empty) batch under contention.
        let rows = sqlx::query_as::<_, (String, i64, Json<Payload>)>(
            "SELECT source_name, event_id, payload FROM event_inbox \
             ORDER BY source_name, event_id \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(source_name, event_id, Json(payload))| InboxRow {
                source_name,
                event_id,
                payload,
            })
            .collect())
    }

    async fn insert_event(&mut self, row: &InboxRow) -> Result<(), StoreError> {
        insert_row(&mut *self.tx, EventTable::Events, &row.source_name, row.event_id, &row.payload).await
    }

    async fn advance_last_stored_id(&mut self, source_name: &str, id: EventId) -> Result<(), StoreError> {
        advance_stored(&mut *self.tx, source_name, id).await
    }

    async fn delete_inbox_rows(&mut self, source_name: &str, event_ids: &[EventId]) -> Result<(), StoreError> {
        if event_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM event_inbox WHERE source_name = $1 AND event_id = ANY($2)")
            .bind(source_name)
            .bind(event_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
