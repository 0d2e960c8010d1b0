//! Error types for the gridcalc engine

use thiserror::Error;

/// Result type alias using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures reported by a storage collaborator
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the request
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A record came back in a shape the engine cannot use
    #[error("Invalid cell record: {0}")]
    InvalidRecord(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by [`Engine`](crate::Engine) operations
///
/// Formula problems never show up here; they are error values inside cells.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Address, bounds or sheet registry error
    #[error(transparent)]
    Core(#[from] gridcalc_core::Error),

    /// A range load or save failed; in-memory state is unchanged and the
    /// operation can be retried
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Check whether this is a storage failure
    pub fn is_storage(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }
}
