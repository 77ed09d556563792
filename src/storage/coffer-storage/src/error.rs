//! Storage error types.

use thiserror::Error;

/// Errors reported by an object store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// A read, write or list request failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The request itself was rejected by the backend.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
