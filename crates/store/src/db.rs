use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use sluice_core::config::PostgresConfig;

use crate::error::StoreError;

/// Create a PostgreSQL connection pool.
///
/// Every held lease pins one connection for its lifetime, so the pool needs
/// at least two: one for the lease, one for everything else.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let url = config.database_url()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(2))
        .connect(&url)
        .await?;
    info!(host = %config.host, max_connections = config.max_connections.max(2), "PostgreSQL connected");
    Ok(pool)
}

/// Apply the bundled schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    info!("Database migrations applied successfully");
    Ok(())
}
