//! Package seals: manifest plus checksum plus signature.
//!
//! Signing and signature verification belong to an external crypto
//! collaborator and are reached through [`SealVerifier`]. The built-in
//! [`DigestVerifier`] only checks that the content matches the seal digest.

use crate::hash::{Digest, Hasher};
use crate::{Error, Result, json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes the sealed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Package type, e.g. `content/zip`.
    #[serde(rename = "type")]
    pub package_type: String,
    /// Content file reference (stem of the `.zip`/`.json` pair).
    #[serde(rename = "ref")]
    pub reference: String,
    /// Content size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Build time.
    pub time: DateTime<Utc>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Manifest, checksum of manifest + content, and an optional signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seal {
    /// The sealed manifest.
    pub manifest: Manifest,
    /// `sha256:<hex>` over the manifest JSON followed by the content bytes.
    pub digest: String,
    /// Detached signature over the digest, produced externally.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

impl Seal {
    /// Seal `content` with an empty signature.
    ///
    /// # Errors
    /// Returns error if the manifest cannot be serialized.
    pub fn compute(manifest: Manifest, content: &[u8]) -> Result<Self> {
        let digest = checksum(&manifest, content)?;
        Ok(Self {
            manifest,
            digest: digest.to_string(),
            signature: String::new(),
        })
    }

    /// Package identifier: digest of the serialized seal.
    ///
    /// # Errors
    /// Returns error if the seal cannot be serialized.
    pub fn package_id(&self) -> Result<String> {
        let bytes = json::to_json(self)?;
        Ok(Digest::of(bytes.as_bytes()).to_string())
    }

    /// Parse a seal document.
    ///
    /// # Errors
    /// Returns [`Error::CorruptData`] if the bytes are not a seal, or
    /// [`Error::Validation`] if its file reference is not a plain file stem.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let seal: Self = json::from_json_strict(bytes, "seal")?;
        validate_file_ref(&seal.manifest.reference)?;
        Ok(seal)
    }
}

/// Check that a file reference is a bare file stem that stays inside the
/// directory it is joined to.
///
/// # Errors
/// Returns [`Error::Validation`] for an empty reference or one containing a
/// path separator or `..`.
pub fn validate_file_ref(reference: &str) -> Result<()> {
    if reference.is_empty()
        || reference == "."
        || reference.contains("..")
        || reference.contains(['/', '\\', '\0'])
    {
        return Err(Error::validation(format!(
            "invalid file reference '{reference}'"
        )));
    }
    Ok(())
}

fn checksum(manifest: &Manifest, content: &[u8]) -> Result<Digest> {
    let mut hasher = Hasher::new();
    hasher.update(json::to_json(manifest)?.as_bytes());
    hasher.update(content);
    Ok(hasher.finalize())
}

/// Verifies that content matches its seal.
pub trait SealVerifier: Send + Sync + std::fmt::Debug {
    /// Check `content` against `seal`.
    ///
    /// # Errors
    /// Returns [`Error::Integrity`] when verification fails.
    fn verify(&self, seal: &Seal, content: &[u8]) -> Result<()>;
}

/// Recomputes the seal digest; does not check signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestVerifier;

impl SealVerifier for DigestVerifier {
    fn verify(&self, seal: &Seal, content: &[u8]) -> Result<()> {
        let actual = checksum(&seal.manifest, content)?;
        let expected = Digest::parse(&seal.digest)
            .ok_or_else(|| Error::Integrity(format!("seal digest '{}' is malformed", seal.digest)))?;
        if actual != expected {
            return Err(Error::Integrity(format!(
                "content of '{}' does not match its seal: expected {expected}, got {actual}",
                seal.manifest.reference
            )));
        }
        Ok(())
    }
}
