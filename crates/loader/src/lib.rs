//! The ingestion pipeline: scheduler, batch handler and inbox retry worker.

pub mod error;
pub mod handler;
pub mod loader;
pub mod retry;
pub mod stores;
pub mod validator;

pub use error::LoadError;
pub use handler::EventBatchHandler;
pub use loader::EventLoader;
pub use retry::InboxRetryWorker;
pub use stores::Stores;
