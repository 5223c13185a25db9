use thiserror::Error;

/// Failure reported by an [`EventSource`](crate::EventSource) fetch.
///
/// `Unavailable` is the transient, expected case: the loader skips the
/// source for this pass. Everything else is treated as unexpected.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source {source_name} unavailable: {message}")]
    Unavailable { source_name: String, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    pub fn unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid database URL: {0}")]
    DatabaseUrl(String),

    #[error("invalid source binding: {0}")]
    SourceBinding(String),
}
