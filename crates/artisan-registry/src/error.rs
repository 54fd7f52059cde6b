//! Registry protocol errors.

use artisan_core::Error as CoreError;
use thiserror::Error;

/// Errors raised while talking to a remote registry.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Credentials were missing or rejected (401/403).
    #[error("the registry at {url} rejected the credentials (HTTP {status})")]
    AuthRejected {
        /// Request URL.
        url: String,
        /// HTTP status.
        status: u16,
    },

    /// The requested resource does not exist (404).
    #[error("not found: {url}")]
    NotFound {
        /// Request URL.
        url: String,
    },

    /// The endpoint answered with something that is not registry JSON.
    #[error(
        "malformed response from {url}: {message}; check the domain points to an artisan registry"
    )]
    MalformedResponse {
        /// Request URL.
        url: String,
        /// Parse failure.
        message: String,
    },

    /// The remote repository is locked by another writer (423).
    #[error("repository {repository} is locked on the remote registry, try again later")]
    Locked {
        /// Repository path.
        repository: String,
    },

    /// Any other non-success status.
    #[error("HTTP {status} from {url}: {message}")]
    Status {
        /// Request URL.
        url: String,
        /// HTTP status.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Connection, TLS or timeout failure.
    #[error("transport error for {url}: {message}")]
    Transport {
        /// Request URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// Every allowed attempt failed.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: Box<ProtocolError>,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Local failure while preparing or storing data.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ProtocolError {
    /// Transport failures and server errors may succeed on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn transport(url: impl Into<String>, err: &reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            message: err.to_string(),
        }
    }
}

impl From<ProtocolError> for CoreError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::AuthRejected { .. } => Self::Auth(err.to_string()),
            ProtocolError::NotFound { url } => Self::NotFound(url),
            ProtocolError::MalformedResponse { .. } => Self::CorruptData(err.to_string()),
            ProtocolError::Locked { repository } => Self::Locked { repository },
            ProtocolError::Status { .. }
            | ProtocolError::Transport { .. }
            | ProtocolError::RetriesExhausted { .. }
            | ProtocolError::Cancelled => Self::Transport(err.to_string()),
            ProtocolError::Core(inner) => inner,
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
