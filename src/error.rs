//! Error types for stowage.

use thiserror::Error;

/// Common error type for stowage.
#[derive(Error, Debug)]
pub enum StowageError {
    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error from the blob store or config loading.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or inconsistent Content-Range descriptor.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// A continuation chunk referenced no in-progress upload.
    #[error("no upload in progress at {0}")]
    UploadNotFound(String),

    /// No combination of the owner's accounts covers the requested size.
    #[error("quota exceeded: {required} bytes required, {available} bytes available")]
    QuotaExceeded {
        /// Bytes the upload declared.
        required: u64,
        /// Bytes left across all of the owner's accounts.
        available: u64,
    },

    /// Item name is empty or contains the path separator.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Validation error for user input or item invariants.
    #[error("validation error: {0}")]
    Validation(String),

    /// Content was requested before every byte arrived.
    #[error("upload incomplete: {uploaded} of {total} bytes received")]
    IncompleteUpload {
        /// Contiguous bytes received so far.
        uploaded: u64,
        /// Declared total size.
        total: u64,
    },

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Cross-owner access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for StowageError {
    fn from(e: sqlx::Error) -> Self {
        StowageError::Database(e.to_string())
    }
}

/// Result type alias for stowage operations.
pub type Result<T> = std::result::Result<T, StowageError>;
