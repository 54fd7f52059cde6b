//! Response encoding chosen from the `Accept` header.

use crate::error::ApiError;
use artisan_core::json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Supported response encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// `application/json`
    #[default]
    Json,
    /// `application/yaml`
    Yaml,
    /// `application/xml`
    Xml,
}

impl Format {
    /// First recognised media type in `Accept`, JSON when none matches.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .find_map(|item| {
                let media = item.split(';').next().unwrap_or_default().trim();
                Self::from_media_type(media)
            })
            .unwrap_or_default()
    }

    fn from_media_type(media: &str) -> Option<Self> {
        match media.to_ascii_lowercase().as_str() {
            "application/json" | "*/*" | "application/*" => Some(Self::Json),
            "application/yaml" | "application/x-yaml" | "text/yaml" | "text/x-yaml" => Some(Self::Yaml),
            "application/xml" | "text/xml" => Some(Self::Xml),
            _ => None,
        }
    }

    /// `Content-Type` for this encoding.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Yaml => "application/yaml",
            Self::Xml => "application/xml",
        }
    }

    /// Encode one value; `root` names the XML document element.
    ///
    /// # Errors
    /// Returns [`ApiError::Internal`] if the value cannot be encoded.
    pub fn encode<T: Serialize>(self, value: &T, root: &str) -> Result<String, ApiError> {
        match self {
            Self::Json => json::to_json(value).map_err(|e| ApiError::Internal(e.to_string())),
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| ApiError::Internal(e.to_string())),
            Self::Xml => quick_xml::se::to_string_with_root(root, value)
                .map_err(|e| ApiError::Internal(e.to_string())),
        }
    }

    /// Encode a sequence. XML wraps one `item` element per value in `root`.
    ///
    /// # Errors
    /// Returns [`ApiError::Internal`] if a value cannot be encoded.
    pub fn encode_list<T: Serialize>(self, values: &[T], root: &str, item: &str) -> Result<String, ApiError> {
        match self {
            Self::Xml => {
                let mut out = format!("<{root}>");
                for value in values {
                    out.push_str(&self.encode(value, item)?);
                }
                out.push_str(&format!("</{root}>"));
                Ok(out)
            }
            _ => self.encode(&values, root),
        }
    }

    fn respond_body(self, status: StatusCode, body: String) -> Response {
        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type()),
        );
        response
    }
}

/// `200` with `value` encoded as `format`.
pub fn respond<T: Serialize>(format: Format, value: &T, root: &str) -> Result<Response, ApiError> {
    respond_with(format, StatusCode::OK, value, root)
}

/// `status` with `value` encoded as `format`.
pub fn respond_with<T: Serialize>(
    format: Format,
    status: StatusCode,
    value: &T,
    root: &str,
) -> Result<Response, ApiError> {
    Ok(format.respond_body(status, format.encode(value, root)?))
}

/// `200` with `values` encoded as `format`.
pub fn respond_list<T: Serialize>(
    format: Format,
    values: &[T],
    root: &str,
    item: &str,
) -> Result<Response, ApiError> {
    Ok(format.respond_body(StatusCode::OK, format.encode_list(values, root, item)?))
}
