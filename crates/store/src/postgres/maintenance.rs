//! Request-log housekeeping.
//!
//! Terminal rows accumulate forever otherwise. Pruning deletes them past a
//! per-status retention window, optionally copying them into
//! `event_request_log_archive` first. The archive table is provisioned
//! outside this crate; when it is missing, `archive` is a no-op.

use serde::Serialize;
use sqlx::{Postgres, Transaction};
use tracing::info;

use crate::error::StoreError;
use crate::status::RequestStatus;

use super::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOptions {
    pub succeeded_days: u32,
    pub failed_days: u32,
    pub archive: bool,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            succeeded_days: 7,
            failed_days: 30,
            archive: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub archived: u64,
    pub deleted_succeeded: u64,
    pub deleted_failed: u64,
}

impl PgStore {
    /// Prune terminal request-log rows in one transaction.
    pub async fn prune_request_log(&self, options: PruneOptions) -> Result<PruneReport, StoreError> {
        let mut tx = self.pool.begin().await?;

        let archive = options.archive && archive_table_exists(&mut tx).await?;
        let mut report = PruneReport::default();

        for (status, days) in [
            (RequestStatus::Succeeded, options.succeeded_days),
            (RequestStatus::Failed, options.failed_days),
        ] {
            if archive {
                report.archived += archive_rows(&mut tx, status, days).await?;
            }
            let deleted = delete_rows(&mut tx, status, days).await?;
            match status {
                RequestStatus::Succeeded => report.deleted_succeeded = deleted,
                RequestStatus::Failed => report.deleted_failed = deleted,
                RequestStatus::Reserved | RequestStatus::InboxOnly => {}
            }
        }

        tx.commit().await?;

        info!(
            archived = report.archived,
            deleted_succeeded = report.deleted_succeeded,
            deleted_failed = report.deleted_failed,
            "request log pruned"
        );
        Ok(report)
    }
}

async fn archive_table_exists(tx: &mut Transaction<'static, Postgres>) -> Result<bool, StoreError> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT to_regclass('public.event_request_log_archive') IS NOT NULL",
    )
    .fetch_one(&mut **tx)
    .await?;
    Ok(exists)
}

async fn archive_rows(
    tx: &mut Transaction<'static, Postgres>,
    status: RequestStatus,
    days: u32,
) -> Result<u64, StoreError> {
    let copied = sqlx::query(
        "INSERT INTO event_request_log_archive SELECT * FROM event_request_log \
         WHERE status = $1 AND created_at < NOW() - make_interval(days => $2)",
    )
    .bind(status.as_str())
    .bind(retention_days(days))
    .execute(&mut **tx)
    .await?
    .rows_affected();
    Ok(copied)
}

async fn delete_rows(
    tx: &mut Transaction<'static, Postgres>,
    status: RequestStatus,
    days: u32,
) -> Result<u64, StoreError> {
    let deleted = sqlx::query(
        "DELETE FROM event_request_log \
         WHERE status = $1 AND created_at < NOW() - make_interval(days => $2)",
    )
    .bind(status.as_str())
    .bind(retention_days(days))
    .execute(&mut **tx)
    .await?
    .rows_affected();
    Ok(deleted)
}

fn retention_days(days: u32) -> i32 {
    i32::try_from(days).unwrap_or(i32::MAX)
}
