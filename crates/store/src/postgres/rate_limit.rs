use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::RateLimiter;

use super::PgStore;

#[async_trait]
impl RateLimiter for PgStore {
    async fn try_acquire(&self, source_name: &str, min_interval: Duration) -> Result<bool, StoreError> {
        let min_ms = i64::try_from(min_interval.as_millis()).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent callers for the same source.
        let elapsed_ms = sqlx::query_scalar::<_, i64>(
            "SELECT (EXTRACT(EPOCH FROM (clock_timestamp() - last_request_at)) * 1000)::BIGINT \
             FROM source_rate_limit WHERE source_name = $1 FOR UPDATE",
        )
        .bind(source_name)
        .fetch_optional(&mut *tx)
        .await?;

        match elapsed_ms {
            Some(elapsed) if elapsed < min_ms => {
                tx.rollback().await?;
                debug!(source = %source_name, elapsed_ms = elapsed, "rate limited");
                Ok(false)
            }
            Some(_) => {
                sqlx::query(
                    "UPDATE source_rate_limit SET last_request_at = clock_timestamp() WHERE source_name = $1",
                )
                .bind(source_name)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(true)
            }
            None => {
                // First request ever: whoever inserts the row wins the slot.
                let inserted = sqlx::query(
                    "INSERT INTO source_rate_limit (source_name, last_request_at) \
                     VALUES ($1, clock_timestamp()) ON CONFLICT (source_name) DO NOTHING",
                )
                .bind(source_name)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                tx.commit().await?;
                Ok(inserted == 1)
            }
        }
    }
}
