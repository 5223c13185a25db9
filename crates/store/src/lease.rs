//! Per-source mutual exclusion handle.

use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tracing::warn;

use crate::error::StoreError;
use crate::memory::MemoryState;

/// Exclusive claim on a source, returned by [`LeaseManager::acquire`](crate::LeaseManager::acquire).
///
/// Call [`Lease::release`] when done. Dropping an unreleased lease still frees
/// it: the advisory variant closes its database session (which ends the
/// session-scoped lock), the in-memory variant removes its entry.
pub struct Lease {
    source_name: String,
    handle: LeaseHandle,
}

pub(crate) enum LeaseHandle {
    /// Session-level advisory lock held on this pooled connection.
    Advisory {
        conn: PoolConnection<Postgres>,
        keys: (i32, i32),
    },
    Memory {
        state: Arc<Mutex<MemoryState>>,
        token: u64,
    },
    Released,
}

impl Lease {
    pub(crate) fn new(source_name: impl Into<String>, handle: LeaseHandle) -> Self {
        Self {
            source_name: source_name.into(),
            handle,
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Give the source back. Safe to call when the underlying connection is gone;
    /// in that case the lock already died with the session and the error is returned
    /// for logging only.
    pub async fn release(mut self) -> Result<(), StoreError> {
        match std::mem::replace(&mut self.handle, LeaseHandle::Released) {
            LeaseHandle::Advisory { mut conn, keys: (k1, k2) } => {
                let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1, $2)")
                    .bind(k1)
                    .bind(k2)
                    .fetch_one(&mut *conn)
                    .await;
                match unlocked {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        warn!(source = %self.source_name, "advisory lock was not held at release");
                        drop(conn.detach());
                        Ok(())
                    }
                    Err(e) => {
                        // Closing the session is what frees the lock now.
                        drop(conn.detach());
                        Err(e.into())
                    }
                }
            }
            LeaseHandle::Memory { state, token } => {
                release_memory_lease(&state, &self.source_name, token);
                Ok(())
            }
            LeaseHandle::Released => Ok(()),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.handle, LeaseHandle::Released) {
            LeaseHandle::Advisory { conn, .. } => {
                warn!(source = %self.source_name, "lease dropped without release; closing its session");
                drop(conn.detach());
            }
            LeaseHandle::Memory { state, token } => {
                release_memory_lease(&state, &self.source_name, token);
            }
            LeaseHandle::Released => {}
        }
    }
}

fn release_memory_lease(state: &Mutex<MemoryState>, source_name: &str, token: u64) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.leases.get(source_name).map(|l| l.token) == Some(token) {
        state.leases.remove(source_name);
    }
}

/// Deterministic advisory-lock key pair for a source: the first 8 bytes of
/// `sha256(source_name)` as two big-endian `i32`s.
pub fn lease_keys(source_name: &str) -> (i32, i32) {
    let digest = Sha256::digest(source_name.as_bytes());
    let k1 = i32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let k2 = i32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]);
    (k1, k2)
}
