//! Server configuration from `ARTREG_*` environment variables.

use artisan_core::{Credentials, Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables read by [`ServerConfig::from_env`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEnvVar {
    /// Listen port.
    HttpPort,
    /// Basic auth user.
    HttpUser,
    /// Basic auth password.
    HttpPassword,
    /// Root directory for data, hooks and locks.
    Root,
    /// `fs` or `nexus`.
    Backend,
    /// Object store base URL.
    BackendDomain,
    /// Object store user.
    BackendUser,
    /// Object store password.
    BackendPassword,
    /// Upload size limit in MiB.
    UploadLimit,
    /// Lock staleness in seconds.
    LockTtl,
    /// How long a write waits for a held lock, in milliseconds.
    LockWait,
    /// Metrics toggle.
    Metrics,
    /// API docs toggle.
    Swagger,
}

impl ServerEnvVar {
    /// Variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HttpPort => "ARTREG_HTTP_PORT",
            Self::HttpUser => "ARTREG_HTTP_UNAME",
            Self::HttpPassword => "ARTREG_HTTP_PWD",
            Self::Root => "ARTREG_ROOT",
            Self::Backend => "ARTREG_BACKEND",
            Self::BackendDomain => "ARTREG_BACKEND_DOMAIN",
            Self::BackendUser => "ARTREG_BACKEND_UNAME",
            Self::BackendPassword => "ARTREG_BACKEND_PWD",
            Self::UploadLimit => "ARTREG_UPLOAD_LIMIT",
            Self::LockTtl => "ARTREG_LOCK_TTL",
            Self::LockWait => "ARTREG_LOCK_WAIT_MS",
            Self::Metrics => "ARTREG_METRICS",
            Self::Swagger => "ARTREG_SWAGGER",
        }
    }
}

/// Where package data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Files under `<root>/data`.
    Filesystem,
    /// A Nexus 3 raw repository.
    Nexus {
        /// Base URL, e.g. `http://nexus:8081`.
        domain: String,
        /// Nexus credentials.
        credentials: Credentials,
    },
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// Credentials every request must present.
    pub credentials: Credentials,
    /// Root directory.
    pub root: PathBuf,
    /// Storage backend.
    pub backend: BackendKind,
    /// Maximum multipart body size in bytes.
    pub upload_limit: usize,
    /// Age after which a lock marker is considered abandoned.
    pub lock_ttl: Duration,
    /// How long a write waits for another holder before answering 423.
    pub lock_wait: Duration,
    /// Metrics endpoint toggle.
    pub metrics: bool,
    /// API docs toggle.
    pub swagger: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8082,
            credentials: Credentials::new("admin", "admin"),
            root: PathBuf::from("artreg"),
            backend: BackendKind::Filesystem,
            upload_limit: 30 * 1024 * 1024,
            lock_ttl: Duration::from_secs(15),
            lock_wait: Duration::from_secs(2),
            metrics: false,
            swagger: false,
        }
    }
}

impl ServerConfig {
    /// Read the process environment.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for unparsable values.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |var: ServerEnvVar| lookup(var.as_str()).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(port) = get(ServerEnvVar::HttpPort) {
            config.port = parse_number(ServerEnvVar::HttpPort, &port)?;
        }
        if let Some(user) = get(ServerEnvVar::HttpUser) {
            config.credentials.user = user;
        }
        if let Some(password) = get(ServerEnvVar::HttpPassword) {
            config.credentials.password = password;
        }
        if let Some(root) = get(ServerEnvVar::Root) {
            config.root = PathBuf::from(root);
        }
        if let Some(limit) = get(ServerEnvVar::UploadLimit) {
            let mib: usize = parse_number(ServerEnvVar::UploadLimit, &limit)?;
            config.upload_limit = mib.saturating_mul(1024 * 1024);
        }
        if let Some(ttl) = get(ServerEnvVar::LockTtl) {
            config.lock_ttl = Duration::from_secs(parse_number(ServerEnvVar::LockTtl, &ttl)?);
        }
        if let Some(wait) = get(ServerEnvVar::LockWait) {
            config.lock_wait = Duration::from_millis(parse_number(ServerEnvVar::LockWait, &wait)?);
        }
        config.metrics = get(ServerEnvVar::Metrics).is_some_and(|v| parse_bool(&v));
        config.swagger = get(ServerEnvVar::Swagger).is_some_and(|v| parse_bool(&v));

        config.backend = match get(ServerEnvVar::Backend).as_deref() {
            None | Some("fs" | "FS") => BackendKind::Filesystem,
            Some("nexus" | "NEXUS" | "nexus3") => {
                let domain = get(ServerEnvVar::BackendDomain).ok_or_else(|| {
                    Error::Config(format!(
                        "{} is required for the nexus backend",
                        ServerEnvVar::BackendDomain.as_str()
                    ))
                })?;
                BackendKind::Nexus {
                    domain: domain.trim_end_matches('/').to_string(),
                    credentials: Credentials::new(
                        get(ServerEnvVar::BackendUser).unwrap_or_default(),
                        get(ServerEnvVar::BackendPassword).unwrap_or_default(),
                    ),
                }
            }
            Some(other) => {
                return Err(Error::Config(format!(
                    "{}: unknown backend '{other}', expected 'fs' or 'nexus'",
                    ServerEnvVar::Backend.as_str()
                )));
            }
        };

        Ok(config)
    }

    /// Package data for the filesystem backend.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Webhook configuration document.
    #[must_use]
    pub fn hooks_path(&self) -> PathBuf {
        self.root.join("hooks").join("config.json")
    }

    /// Lock markers.
    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn parse_number<T: std::str::FromStr>(var: ServerEnvVar, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}: '{value}' is not a valid number", var.as_str())))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<ServerConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8082);
        assert_eq!(cfg.credentials, Credentials::new("admin", "admin"));
        assert_eq!(cfg.backend, BackendKind::Filesystem);
        assert_eq!(cfg.upload_limit, 30 * 1024 * 1024);
        assert_eq!(cfg.lock_ttl, Duration::from_secs(15));
        assert_eq!(cfg.lock_wait, Duration::from_secs(2));
        assert!(cfg.hooks_path().ends_with("hooks/config.json"));
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("ARTREG_HTTP_PORT", "9000"),
            ("ARTREG_HTTP_UNAME", "ci"),
            ("ARTREG_UPLOAD_LIMIT", "2"),
            ("ARTREG_LOCK_WAIT_MS", "250"),
            ("ARTREG_METRICS", "true"),
            ("ARTREG_BACKEND", "nexus"),
            ("ARTREG_BACKEND_DOMAIN", "http://nexus:8081/"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.credentials.user, "ci");
        assert_eq!(cfg.upload_limit, 2 * 1024 * 1024);
        assert_eq!(cfg.lock_wait, Duration::from_millis(250));
        assert!(cfg.metrics);
        assert!(matches!(cfg.backend, BackendKind::Nexus { ref domain, .. } if domain == "http://nexus:8081"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(config(&[("ARTREG_HTTP_PORT", "http")]), Err(Error::Config(_))));
        assert!(matches!(config(&[("ARTREG_BACKEND", "s3")]), Err(Error::Config(_))));
        assert!(matches!(config(&[("ARTREG_BACKEND", "nexus")]), Err(Error::Config(_))));
    }
}
