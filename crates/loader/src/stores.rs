use std::sync::Arc;

use sluice_store::{CursorStore, EventInbox, EventStorage, InboxDrain, LeaseManager, RateLimiter, RequestLog};

/// The coordination contracts the loader and retry worker depend on.
#[derive(Clone)]
pub struct Stores {
    pub cursors: Arc<dyn CursorStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub leases: Arc<dyn LeaseManager>,
    pub request_log: Arc<dyn RequestLog>,
    pub inbox: Arc<dyn EventInbox>,
    pub storage: Arc<dyn EventStorage>,
    pub drain: Arc<dyn InboxDrain>,
}

impl Stores {
    /// Every contract served by one backend.
    pub fn from_backend<S>(backend: S) -> Self
    where
        S: CursorStore + RateLimiter + LeaseManager + RequestLog + EventInbox + EventStorage + InboxDrain + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            cursors: backend.clone(),
            rate_limiter: backend.clone(),
            leases: backend.clone(),
            request_log: backend.clone(),
            inbox: backend.clone(),
            storage: backend.clone(),
            drain: backend,
        }
    }
}
