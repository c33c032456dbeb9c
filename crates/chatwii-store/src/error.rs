use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Schema migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The row addressed by an update does not exist.
    #[error("Record not found")]
    NotFound,

    /// A stored value does not map onto the domain model.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Row-level rules rejected the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
