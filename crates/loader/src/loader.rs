//! Per-source scheduling loop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sluice_core::config::LoaderConfig;
use sluice_core::EventSource;
use sluice_store::{CursorStore, LeaseManager, RateLimiter, RequestLog, ReservationId};

use crate::error::LoadError;
use crate::handler::EventBatchHandler;
use crate::stores::Stores;

/// Round-robins its sources, one fetch per source per pass.
///
/// Several loaders may run against the same database; the lease and the
/// request-log reservation keep them from fetching the same range twice.
pub struct EventLoader {
    sources: Vec<Arc<dyn EventSource>>,
    leases: Arc<dyn LeaseManager>,
    rate_limiter: Arc<dyn RateLimiter>,
    cursors: Arc<dyn CursorStore>,
    request_log: Arc<dyn RequestLog>,
    handler: EventBatchHandler,
    config: LoaderConfig,
    shutdown: CancellationToken,
}

impl EventLoader {
    /// `config` is clamped to its allowed ranges.
    pub fn new(sources: Vec<Arc<dyn EventSource>>, stores: &Stores, config: LoaderConfig) -> Self {
        Self {
            sources,
            leases: stores.leases.clone(),
            rate_limiter: stores.rate_limiter.clone(),
            cursors: stores.cursors.clone(),
            request_log: stores.request_log.clone(),
            handler: EventBatchHandler::new(stores),
            config: config.clamped(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Handle for external shutdown wiring (signals, supervisors).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask [`run`](Self::run) to return. A source already in progress finishes first.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Loop over all sources until stopped, sleeping after a pass with no work.
    pub async fn run(&self) {
        info!(
            sources = self.sources.len(),
            batch_size = self.config.batch_size,
            "event loader started"
        );

        while !self.shutdown.is_cancelled() {
            if self.run_pass().await {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.idle_sleep) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }

        info!("event loader stopped");
    }

    /// One pass over every source. Returns whether any source loaded events.
    /// A stop request ends the pass early, before the next source.
    pub async fn run_pass(&self) -> bool {
        let mut did_work = false;
        for source in &self.sources {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.process_source(source.as_ref()).await {
                did_work = true;
            }
        }
        did_work
    }

    /// Lease, rate slot, reservation, fetch, hand off. Never fails: errors are
    /// recorded on the reservation and logged.
    pub async fn process_source(&self, source: &dyn EventSource) -> bool {
        let name = source.name();

        let lease = match self.leases.acquire(name, self.config.lease_ttl).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!(source = %name, "lease held elsewhere, skipping");
                return false;
            }
            Err(e) => {
                error!(source = %name, error = %e, "lease acquire failed");
                return false;
            }
        };

        let mut reservation = None;
        let outcome = self.load_next(source, &mut reservation).await;

        let did_work = match outcome {
            Ok(did_work) => did_work,
            Err(e) => {
                if e.is_unavailable() {
                    warn!(source = %name, error = %e, "source unavailable, skipping");
                } else {
                    error!(source = %name, error = %e, "source processing failed");
                }
                if let Some(id) = reservation {
                    self.fail_reservation(name, id, &e).await;
                }
                false
            }
        };

        if let Err(e) = lease.release().await {
            error!(source = %name, error = %e, "lease release failed");
        }

        did_work
    }

    /// Steps after the lease. `reservation` is set as soon as one exists so the
    /// caller can fail it.
    async fn load_next(
        &self,
        source: &dyn EventSource,
        reservation: &mut Option<ReservationId>,
    ) -> Result<bool, LoadError> {
        let name = source.name();

        if !self.rate_limiter.try_acquire(name, self.config.min_interval).await? {
            debug!(source = %name, "rate limited, skipping");
            return Ok(false);
        }

        let after_id = self.cursors.last_requested_id(name).await?;

        let Some(id) = self
            .request_log
            .reserve(name, after_id, self.config.batch_size)
            .await?
        else {
            debug!(source = %name, after_id, "range already reserved, skipping");
            return Ok(false);
        };
        *reservation = Some(id);

        let events = source.fetch_events(after_id, self.config.batch_size).await?;

        if events.is_empty() {
            self.request_log.release(id).await?;
            *reservation = None;
            return Ok(false);
        }

        self.handler.handle(name, &events, after_id, id).await?;
        Ok(true)
    }

    async fn fail_reservation(&self, source_name: &str, id: ReservationId, cause: &LoadError) {
        if let Err(e) = self.request_log.mark_failed(id, &cause.to_string()).await {
            error!(source = %source_name, reservation = %id, error = %e, "could not mark reservation failed");
        }
    }
}
