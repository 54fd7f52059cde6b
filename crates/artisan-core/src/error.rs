//! Error types for Artisan registry operations.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Artisan.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed package name, tag, filter or payload.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Package, tag or repository absent.
    #[error("{0} not found")]
    NotFound(String),

    /// Tag collision or content already present.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Repository is locked by another writer.
    #[error("repository '{repository}' is locked by another operation")]
    Locked {
        /// Repository path (`group/name`).
        repository: String,
    },

    /// Network or TLS failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Data that should be JSON (or otherwise structured) is not.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// Seal verification failed.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] sonic_rs::Error),

    /// IO error.
    #[error("io error at {path}: {message}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Create an IO error with context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether retrying the failed operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result type for Artisan operations.
pub type Result<T> = std::result::Result<T, Error>;
