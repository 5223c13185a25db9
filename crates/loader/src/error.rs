use thiserror::Error;

use sluice_core::{EventId, SourceError};
use sluice_store::StoreError;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("source {source_name}: event id {current_id} does not follow {previous_id}")]
    OutOfOrder {
        source_name: String,
        previous_id: EventId,
        current_id: EventId,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LoadError {
    /// Transient source outage: skip this pass without alarm.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Source(e) if e.is_unavailable())
    }
}
