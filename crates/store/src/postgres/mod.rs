//! PostgreSQL implementations of the coordination contracts.

mod cursor;
mod drain;
mod events;
mod lease;
pub mod maintenance;
mod rate_limit;
mod request_log;

use sqlx::PgPool;

pub use drain::PgInboxTransaction;

/// All contracts over one shared pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
