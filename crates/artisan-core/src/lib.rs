//! Core types for the Artisan package registry.
//!
//! This crate holds the data model shared by the client, the server and the
//! CLI:
//!
//! - [`PackageName`]: `[domain/]group/name[:tag]` parsing and validation.
//! - [`Package`] and [`Repository`]: index entries with tag-exclusivity helpers.
//! - [`Seal`] and [`SealVerifier`]: the content checksum contract.
//! - [`RepositoryDiff`]: comparison of two snapshots of one repository.
//! - [`Error`]: the error taxonomy used across the workspace.
//!
//! ## Example
//!
//! ```
//! use artisan_core::{PackageName, Repository, RepositoryDiff};
//!
//! let name = PackageName::parse("registry.acme.io/acme/app:v1").unwrap();
//! assert_eq!(name.repository(), "acme/app");
//!
//! let repo = Repository::new(name.fully_qualified_name());
//! assert!(RepositoryDiff::between(&repo, &repo).is_empty());
//! ```

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod credentials;
pub mod diff;
pub mod error;
pub mod hash;
pub mod json;
pub mod name;
pub mod package;
pub mod seal;

pub use credentials::Credentials;
pub use diff::{RepositoryDiff, UpdatedPackage};
pub use error::{Error, Result};
pub use hash::{DIGEST_PREFIX, Digest, Hasher};
pub use json::{from_json, from_json_slice, from_json_strict, to_json, to_json_pretty};
pub use name::{DEFAULT_DOMAIN, DEFAULT_TAG, PackageName};
pub use package::{Package, Repository, elapsed_label};
pub use seal::{DigestVerifier, Manifest, Seal, SealVerifier, validate_file_ref};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
