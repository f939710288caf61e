//! Unified error types for Polystore.
//!
//! This module provides the canonical error type shared by every crate in
//! the workspace. Absence is not an error: `get` returns `Option` and
//! `delete` returns `bool`.

use thiserror::Error;

/// All Polystore errors.
///
/// Validation failures are reported before any state or WAL mutation.
/// I/O failures during a WAL append mean the operation was not applied.
#[derive(Debug, Error)]
pub enum Error {
    /// Empty or oversized names, keys, values, or documents; malformed
    /// encoded payloads.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Query shape not supported by the engine.
    #[error("query unsupported: {0}")]
    QueryUnsupported(String),

    /// I/O failure from WAL append/flush/fsync, snapshot write, or rename.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or WAL parse failure that is not a tolerated truncation of
    /// the final record.
    #[error("corrupt state: {0}")]
    Corrupt(String),

    /// Encoding failure while building a durable record.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for Polystore operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error reports caller input that was rejected before
    /// any mutation.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Check if this is an unsupported-query error.
    pub fn is_query_unsupported(&self) -> bool {
        matches!(self, Error::QueryUnsupported(_))
    }

    /// Check if this error means durable state may be damaged.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::Corrupt(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
