use async_trait::async_trait;
use sqlx::PgExecutor;

use sluice_core::EventId;

use crate::error::StoreError;
use crate::traits::CursorStore;

use super::PgStore;

const ADVANCE_REQUESTED: &str = "INSERT INTO source_cursor (source_name, last_requested_id, last_stored_id) \
     VALUES ($1, $2, 0) \
     ON CONFLICT (source_name) DO UPDATE SET \
     last_requested_id = GREATEST(source_cursor.last_requested_id, EXCLUDED.last_requested_id), \
     updated_at = NOW()";

const ADVANCE_STORED: &str = "INSERT INTO source_cursor (source_name, last_requested_id, last_stored_id) \
     VALUES ($1, 0, $2) \
     ON CONFLICT (source_name) DO UPDATE SET \
     last_stored_id = GREATEST(source_cursor.last_stored_id, EXCLUDED.last_stored_id), \
     updated_at = NOW()";

/// Max-merge `last_stored_id`; shared with the drain transaction.
pub(super) async fn advance_stored<'e, E>(executor: E, source_name: &str, id: EventId) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(ADVANCE_STORED)
        .bind(source_name)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl CursorStore for PgStore {
    async fn last_requested_id(&self, source_name: &str) -> Result<EventId, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT last_requested_id FROM source_cursor WHERE source_name = $1",
        )
        .bind(source_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.unwrap_or(0))
    }

    async fn advance_last_requested_id(&self, source_name: &str, id: EventId) -> Result<(), StoreError> {
        sqlx::query(ADVANCE_REQUESTED)
            .bind(source_name)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn last_stored_id(&self, source_name: &str) -> Result<EventId, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT last_stored_id FROM source_cursor WHERE source_name = $1",
        )
        .bind(source_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id.unwrap_or(0))
    }

    async fn advance_last_stored_id(&self, source_name: &str, id: EventId) -> Result<(), StoreError> {
        advance_stored(&self.pool, source_name, id).await
    }
}
