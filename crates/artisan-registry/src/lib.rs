//! Client side of the Artisan package registry.
//!
//! - [`LocalIndex`]: the package index under the registry home.
//! - [`RegistryApi`]: single HTTP calls against a registry, with HTTPS
//!   probing and plain HTTP fallback.
//! - [`RegistryClient`]: push and pull with retries.
//! - [`RemoteAdmin`]: bulk listing and removal on a remote registry.
//! - [`archive`]: tar export and import of indexed packages.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod index;
pub mod remote;
pub mod retry;

pub use api::{RegistryApi, Scheme, UploadStatus};
pub use client::{PullOutcome, PushOutcome, RegistryClient};
pub use config::{ClientConfig, HOME_ENV, INDEX_FILE, RegistryHome, TlsMode};
pub use error::{ProtocolError, Result};
pub use index::{IndexDocument, IndexEntry, IndexStore, JsonFileStore, LocalIndex, NO_TAG};
pub use remote::{RemoteAdmin, RemoteEntry, validate_domain};
pub use retry::{Attempt, RetryError, RetryPolicy, retry};
