use thiserror::Error;

use chatwii_shared::DecodeError;

/// Errors surfaced by a realtime backend or by the layer on top of it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// Security rules rejected the read, write or listen.
    #[error("Permission denied at {0}")]
    PermissionDenied(String),

    /// The backend is unreachable or dropped the listener.
    #[error("Disconnected from realtime backend")]
    Disconnected,

    /// The path (or the conversation key it was built from) is unusable.
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),

    #[error("Malformed payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Realtime backend error: {0}")]
    Backend(String),
}

impl RealtimeError {
    /// Terminal errors tear a listener down for good; everything else is a
    /// connectivity problem worth retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RealtimeError::PermissionDenied(_)
                | RealtimeError::InvalidPath(_)
                | RealtimeError::Decode(_)
                | RealtimeError::Serialization(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
