use callcore_media_core::MediaError;
use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Error types for call sessions and the call registry
#[derive(Debug, Error)]
pub enum SessionError {
    /// Error raised by the stream manager
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// Connection already made, not initialized, or the call already exists
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// No call registered under the chat id
    #[error("Connection with chat id {0} not found")]
    ConnectionNotFound(i64),

    /// Dispatch queue failure
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] callcore_infra_common::Error),
}

impl SessionError {
    pub fn connection(msg: impl Into<String>) -> Self {
        SessionError::ConnectionError(msg.into())
    }

    pub fn not_found(chat_id: i64) -> Self {
        SessionError::ConnectionNotFound(chat_id)
    }

    /// Whether the error comes from invalid media parameters
    pub fn is_invalid_params(&self) -> bool {
        matches!(self, SessionError::Media(MediaError::InvalidParams(_)))
    }
}
