//! HTTP error responses.

use artisan_core::Error;
use axum::extract::multipart::MultipartError;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

/// Realm announced on 401 responses.
pub const AUTH_REALM: &str = r#"Basic realm="artisan""#;

/// Errors returned by request handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed path, body or parameters (400).
    #[error("{0}")]
    BadRequest(String),

    /// No credentials (401).
    #[error("authentication required")]
    Unauthorized,

    /// Wrong credentials (403).
    #[error("invalid credentials")]
    Forbidden,

    /// Resource absent (404).
    #[error("{0}")]
    NotFound(String),

    /// Conflicting state (409).
    #[error("{0}")]
    Conflict(String),

    /// Repository lock held by another request (423).
    #[error("repository {0} is locked, try again later")]
    Locked(String),

    /// Body over the upload limit (413).
    #[error("request body exceeds the upload limit")]
    PayloadTooLarge,

    /// The storage backend failed (502).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Local storage failed or holds unreadable data (500). The detail is
    /// logged, never sent to the client.
    #[error("storage error: {0}")]
    Storage(String),

    /// Anything else (500). The detail is logged, never sent to the client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Locked(_) => StatusCode::LOCKED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response body; server-side details stay in the log.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Storage(_) => "internal storage error".to_string(),
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) | Error::Integrity(msg) => Self::BadRequest(msg),
            Error::Json(e) => Self::BadRequest(format!("invalid JSON: {e}")),
            Error::NotFound(what) => Self::NotFound(format!("{what} not found")),
            Error::Conflict(msg) => Self::Conflict(msg),
            Error::Locked { repository } => Self::Locked(repository),
            Error::Transport(msg) | Error::Auth(msg) => Self::Backend(msg),
            e @ (Error::CorruptData(_) | Error::Io { .. } | Error::Config(_)) => {
                Self::Storage(e.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::BadRequest(format!("invalid multipart body: {}", err.body_text()))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let mut response = (status, self.body()).into_response();
        if matches!(self, Self::Unauthorized) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_REALM));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (Error::validation("bad"), StatusCode::BAD_REQUEST),
            (Error::not_found("tag v1"), StatusCode::NOT_FOUND),
            (Error::Conflict("dup".into()), StatusCode::CONFLICT),
            (
                Error::Locked {
                    repository: "acme/app".into(),
                },
                StatusCode::LOCKED,
            ),
            (Error::Transport("down".into()), StatusCode::BAD_GATEWAY),
            (Error::CorruptData("html".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn storage_details_stay_out_of_the_body() {
        let err = ApiError::from(Error::io(
            "/srv/artisan/data/acme/app/repository.json",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ));
        assert!(err.to_string().contains("/srv/artisan"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"internal storage error");

        let corrupt = ApiError::from(Error::CorruptData("acme/app: expected value".into()));
        assert_eq!(corrupt.body(), "internal storage error");
        assert_eq!(ApiError::Internal("yaml: bad map".into()).body(), "internal server error");
    }

    #[test]
    fn unauthorized_announces_realm() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], AUTH_REALM);
    }
}
