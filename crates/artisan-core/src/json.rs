//! JSON helpers over sonic-rs.

use crate::{Error, Result};
use serde::{Serialize, de::DeserializeOwned};

/// Deserialize JSON string.
///
/// # Errors
/// Returns error if JSON is invalid.
pub fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    sonic_rs::from_str(s).map_err(Error::from)
}

/// Deserialize JSON bytes.
///
/// # Errors
/// Returns error if JSON is invalid.
pub fn from_json_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    sonic_rs::from_slice(bytes).map_err(Error::from)
}

/// Serialize to compact JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    sonic_rs::to_string(value).map_err(Error::from)
}

/// Serialize to pretty JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String> {
    sonic_rs::to_string_pretty(value).map_err(Error::from)
}

/// Deserialize a payload that must be JSON, reporting anything else as corrupt.
///
/// Remote endpoints that are not registries often answer with an HTML page;
/// `what` names the document in the resulting error.
///
/// # Errors
/// Returns [`Error::CorruptData`] when the bytes are not valid JSON for `T`.
pub fn from_json_strict<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    sonic_rs::from_slice(bytes).map_err(|e| Error::CorruptData(format!("{what} is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        size: u64,
    }

    #[test]
    fn parses_what_it_writes() {
        let orig = Doc {
            name: "app".into(),
            size: 42,
        };
        let json = to_json_pretty(&orig).unwrap();
        let parsed: Doc = from_json(&json).unwrap();
        assert_eq!(orig, parsed);
    }

    #[test]
    fn html_is_corrupt_data() {
        let err = from_json_strict::<Doc>(b"<html>404</html>", "repository.json").unwrap_err();
        assert!(matches!(err, Error::CorruptData(msg) if msg.contains("repository.json")));
    }
}
