//! Durable state behind the ingestion pipeline.
//!
//! The traits in [`traits`] are the coordination contracts the loader and
//! retry worker are written against. [`PgStore`] is the production
//! implementation; [`MemoryStore`] mirrors its semantics in-process.

pub mod db;
pub mod error;
pub mod lease;
pub mod memory;
pub mod postgres;
pub mod status;
pub mod traits;

pub use error::StoreError;
pub use lease::Lease;
pub use memory::MemoryStore;
pub use postgres::maintenance::{PruneOptions, PruneReport};
pub use postgres::PgStore;
pub use status::{RequestLogEntry, RequestStatus, ReservationId};
pub use traits::*;
