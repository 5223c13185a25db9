use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::lease::{lease_keys, Lease, LeaseHandle};
use crate::traits::LeaseManager;

use super::PgStore;

#[async_trait]
impl LeaseManager for PgStore {
    /// `pg_try_advisory_lock` on a dedicated pooled connection.
    ///
    /// The lock is owned by that session, so it disappears with the connection
    /// if the process dies. `ttl` bounds the wait for a free pool connection;
    /// running out of connections counts as "not acquired".
    async fn acquire(&self, source_name: &str, ttl: Duration) -> Result<Option<Lease>, StoreError> {
        let mut conn = match tokio::time::timeout(ttl, self.pool.acquire()).await {
            Ok(conn) => conn?,
            Err(_) => {
                debug!(source = %source_name, ?ttl, "no pool connection available for lease");
                return Ok(None);
            }
        };

        let (k1, k2) = lease_keys(source_name);
        let locked = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1, $2)")
            .bind(k1)
            .bind(k2)
            .fetch_one(&mut *conn)
            .await?;

        if !locked {
            return Ok(None);
        }

        Ok(Some(Lease::new(
            source_name,
            LeaseHandle::Advisory {
                conn,
                keys: (k1, k2),
            },
        )))
    }
}
