use chrono::{DateTime, Utc};
use thiserror::Error;

use chatwii_realtime::RealtimeError;
use chatwii_shared::{MediaType, ValidationError};
use chatwii_store::StoreError;

/// Coarse classification a UI can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Permission,
    Connectivity,
    Validation,
    Timeout,
    NotFound,
    Internal,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("You cannot interact with this user")]
    Blocked,

    #[error("Sending too fast, slow down")]
    RateLimited,

    #[error("Duplicate message")]
    DuplicateMessage,

    #[error("{} messages require VIP", .0.as_str())]
    MediaNotAllowed(MediaType),

    #[error("Daily photo limit of {limit} reached")]
    QuotaExceeded { limit: u32 },

    #[error("Account banned: {reason}")]
    Banned {
        reason: String,
        until: Option<DateTime<Utc>>,
    },

    #[error("Chatwii is in maintenance, try again later")]
    Maintenance,

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Validation(_)
            | ClientError::RateLimited
            | ClientError::DuplicateMessage
            | ClientError::QuotaExceeded { .. } => ErrorKind::Validation,

            ClientError::Realtime(e) => match e {
                RealtimeError::PermissionDenied(_) => ErrorKind::Permission,
                RealtimeError::Disconnected | RealtimeError::Backend(_) => ErrorKind::Connectivity,
                RealtimeError::InvalidPath(_) => ErrorKind::Validation,
                RealtimeError::Decode(_) | RealtimeError::Serialization(_) => ErrorKind::Internal,
            },

            ClientError::Store(e) => match e {
                StoreError::PermissionDenied(_) | StoreError::NotSignedIn => ErrorKind::Permission,
                StoreError::NotFound => ErrorKind::NotFound,
                StoreError::Unavailable(_) => ErrorKind::Connectivity,
                _ => ErrorKind::Internal,
            },

            ClientError::NotSignedIn
            | ClientError::Blocked
            | ClientError::MediaNotAllowed(_)
            | ClientError::Banned { .. }
            | ClientError::Maintenance
            | ClientError::NotAllowed(_) => ErrorKind::Permission,

            ClientError::NotFound(_) => ErrorKind::NotFound,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Translation(_) => ErrorKind::Connectivity,
            ClientError::Settings(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
