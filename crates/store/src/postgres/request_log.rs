use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sluice_core::EventId;

use crate::error::StoreError;
use crate::status::{RequestLogEntry, RequestStatus, ReservationId};
use crate::traits::RequestLog;

use super::PgStore;

#[derive(sqlx::FromRow)]
struct RequestLogRow {
    id: i64,
    source_name: String,
    after_id: i64,
    limit_count: i32,
    status: String,
    max_id: Option<i64>,
    error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestLogRow> for RequestLogEntry {
    type Error = StoreError;

    fn try_from(row: RequestLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ReservationId(row.id),
            source_name: row.source_name,
            after_id: row.after_id,
            limit: i64::from(row.limit_count),
            status: row.status.parse()?,
            max_id: row.max_id,
            error: row.error,
            updated_at: row.updated_at,
        })
    }
}

impl PgStore {
    /// Move a row to `to`, only from one of its allowed predecessor states.
    async fn transition(
        &self,
        id: ReservationId,
        to: RequestStatus,
        max_id: Option<EventId>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let allowed: Vec<String> = to.predecessors().iter().map(|s| s.as_str().to_string()).collect();

        let updated = sqlx::query(
            "UPDATE event_request_log \
             SET status = $2, max_id = COALESCE($3, max_id), error = COALESCE($4, error), updated_at = NOW() \
             WHERE id = $1 AND status = ANY($5)",
        )
        .bind(id.0)
        .bind(to.as_str())
        .bind(max_id)
        .bind(error)
        .bind(allowed)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::InvalidTransition { id, to });
        }
        Ok(())
    }
}

#[async_trait]
impl RequestLog for PgStore {
    async fn reserve(
        &self,
        source_name: &str,
        after_id: EventId,
        limit: usize,
    ) -> Result<Option<ReservationId>, StoreError> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO event_request_log (source_name, after_id, limit_count, status) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (source_name, after_id) DO NOTHING \
             RETURNING id",
        )
        .bind(source_name)
        .bind(after_id)
        .bind(limit)
        .bind(RequestStatus::Reserved.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.map(ReservationId))
    }

    async fn mark_inbox_only(&self, id: ReservationId, max_id: EventId) -> Result<(), StoreError> {
        self.transition(id, RequestStatus::InboxOnly, Some(max_id), None).await
    }

    async fn mark_succeeded(&self, id: ReservationId, max_id: EventId) -> Result<(), StoreError> {
        self.transition(id, RequestStatus::Succeeded, Some(max_id), None).await
    }

    async fn mark_failed(&self, id: ReservationId, error: &str) -> Result<(), StoreError> {
        self.transition(id, RequestStatus::Failed, None, Some(error)).await
    }

    async fn release(&self, id: ReservationId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM event_request_log WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, source_name: &str, after_id: EventId) -> Result<Option<RequestLogEntry>, StoreError> {
        let row = sqlx::query_as::<_, RequestLogRow>(
            "SELECT id, source_name, after_id, limit_count, status, max_id, error, updated_at \
             FROM event_request_log WHERE source_name = $1 AND after_id = $2",
        )
        .bind(source_name)
        .bind(after_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RequestLogEntry::try_from).transpose()
    }

    async fn clear_failed(&self, source_name: &str, after_id: Option<EventId>) -> Result<u64, StoreError> {
        let deleted = sqlx::query(
            "DELETE FROM event_request_log \
             WHERE source_name = $1 AND status = $2 AND ($3::BIGINT IS NULL OR after_id = $3)",
        )
        .bind(source_name)
        .bind(RequestStatus::Failed.as_str())
        .bind(after_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(deleted)
    }
}
