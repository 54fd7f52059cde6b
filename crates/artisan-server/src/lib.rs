//! HTTP registry server for Artisan packages.
//!
//! The server is a stateless façade over a [`StorageBackend`]. Writes to a
//! repository are serialized through file-marker [`RepositoryLock`]s so that
//! several handler tasks, or several server processes sharing one root, never
//! interleave their read-modify-write of the same repository metadata.
//!
//! ## Example
//!
//! ```no_run
//! use artisan_server::{Server, ServerConfig, shutdown_signal};
//!
//! # async fn run() -> artisan_core::Result<()> {
//! let config = ServerConfig::from_env()?;
//! Server::bind(&config).await?.run(shutdown_signal()).await
//! # }
//! ```

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod error;
pub mod lock;
pub mod negotiate;
pub mod server;
pub mod webhook;

pub use backend::{FsBackend, Nexus3Backend, StorageBackend};
pub use config::{BackendKind, ServerConfig, ServerEnvVar};
pub use error::ApiError;
pub use lock::{LockGuard, RepositoryLock};
pub use negotiate::Format;
pub use server::{AppState, Server, router, shutdown_signal};
pub use webhook::{
    Webhook, WebhookAction, WebhookDispatcher, WebhookEvent, WebhookRegistry, WebhookRequest,
};
