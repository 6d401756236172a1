use std::io;

use thiserror::Error;

/// Failure reported by an [`ObjectStore`](crate::store::ObjectStore) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors that abort an operation before any mutation happens.
///
/// Per-item problems inside a batch are never returned as a `RepoError`; they
/// are recorded as issues in the batch [`Status`](crate::status::Status).
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("unknown or unconfigured zone: {0}")]
    UnknownZone(String),

    #[error("locator belongs to foreign repository '{found}', expected '{expected}'")]
    ForeignRepository { expected: String, found: String },

    #[error("malformed locator: {0}")]
    MalformedLocator(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StorageResult<T> = Result<T, StorageError>;
pub type RepoResult<T> = Result<T, RepoError>;
