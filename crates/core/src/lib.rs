pub mod config;
pub mod error;
pub mod event;
pub mod source;

pub use config::Config;
pub use error::*;
pub use event::*;
pub use source::EventSource;
