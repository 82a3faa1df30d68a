//! Error types for the offsync engine.

use crate::{LocalId, RemoteId};
use thiserror::Error;

/// Outcome of a failed remote-service call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote record not found: {0}")]
    NotFound(RemoteId),

    #[error("remote conflict: {0}")]
    Conflict(String),

    #[error("remote request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Other(err.to_string())
    }
}

/// All possible errors from the offsync engine.
#[derive(Debug, Error)]
pub enum Error {
    // Local store errors
    #[error("local store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("local store quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("local database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("local schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Record errors
    #[error("record not found: {0}")]
    RecordNotFound(LocalId),

    #[error("record {0} is pending deletion")]
    RecordDeleted(LocalId),

    #[error("record has not been saved locally")]
    Unsaved,

    #[error("record {0} has no remote id")]
    MissingRemoteId(LocalId),

    // Remote errors
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sync coordinator has stopped")]
    CoordinatorStopped,
}

impl Error {
    /// Whether this error came from the local store itself rather than from
    /// the data or the remote service. Storage errors abort a sync run.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_)
                | Error::QuotaExceeded(_)
                | Error::Database(_)
                | Error::Migration(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
