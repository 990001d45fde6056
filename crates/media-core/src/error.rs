use std::io;
use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Error types for media operations
#[derive(Debug, Error)]
pub enum MediaError {
    /// Device/mode combination not allowed, unregistered external source,
    /// unsupported input mode or malformed description
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Operation requires a step that has not been performed, or was
    /// performed twice
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// I/O error from a file or process backed source/sink
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Source or sink has no more frames, or has been closed
    #[error("End of stream: {0}")]
    EndOfStream(String),

    /// Shell process could not be spawned or wired
    #[error("Shell error: {0}")]
    Shell(String),

    /// Dispatch queue failure
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] callcore_infra_common::Error),
}

impl MediaError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        MediaError::InvalidParams(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        MediaError::ConnectionError(msg.into())
    }

    pub fn end_of_stream(msg: impl Into<String>) -> Self {
        MediaError::EndOfStream(msg.into())
    }

    pub fn shell(msg: impl Into<String>) -> Self {
        MediaError::Shell(msg.into())
    }
}
