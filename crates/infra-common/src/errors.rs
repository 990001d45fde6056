use thiserror::Error;

/// Result type alias using the common [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types for the callcore stack
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dispatch queue stopped: {0}")]
    QueueStopped(String),

    #[error("Task abandoned on queue {0}")]
    TaskAbandoned(String),
}
