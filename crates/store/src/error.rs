//! Store error types.

use thiserror::Error;

use sluice_core::ConfigError;

use crate::status::{RequestStatus, ReservationId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown request status: {0}")]
    UnknownStatus(String),

    #[error("request {id} cannot move to {to}")]
    InvalidTransition { id: ReservationId, to: RequestStatus },
}
