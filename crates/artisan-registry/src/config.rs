//! Client configuration and registry home layout.

use artisan_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the registry home directory.
pub const HOME_ENV: &str = "ARTISAN_HOME";

/// Index file name, shared with server-side repository metadata.
pub const INDEX_FILE: &str = "repository.json";

/// Directory holding the local index, package content and seals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryHome {
    root: PathBuf,
}

impl RegistryHome {
    /// Use an explicit root directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve from `ARTISAN_HOME`, falling back to `~/.artisan`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if no home directory can be determined.
    pub fn from_env() -> Result<Self> {
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(root));
        }
        let dirs = directories::BaseDirs::new()
            .ok_or_else(|| Error::Config("cannot determine the user home directory".into()))?;
        Ok(Self::new(dirs.home_dir().join(".artisan")))
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the index document.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Path of a package's content archive.
    #[must_use]
    pub fn content_path(&self, file_ref: &str) -> PathBuf {
        self.root.join(format!("{file_ref}.zip"))
    }

    /// Path of a package's seal.
    #[must_use]
    pub fn seal_path(&self, file_ref: &str) -> PathBuf {
        self.root.join(format!("{file_ref}.json"))
    }

    /// Scratch space for downloads.
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Create the directory tree.
    ///
    /// # Errors
    /// Returns IO error if directories cannot be created.
    pub fn ensure(&self) -> Result<()> {
        for dir in [self.root.clone(), self.tmp_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }
}

/// How the client chooses between HTTPS and HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Try HTTPS first, fall back to HTTP with a warning.
    #[default]
    Probe,
    /// HTTPS only.
    Require,
    /// HTTP only.
    Disable,
}

/// Network settings for the registry protocol client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum attempts for retried calls.
    pub attempts: u32,
    /// First backoff delay, doubled on each attempt.
    pub initial_backoff: Duration,
    /// Scheme negotiation.
    pub tls: TlsMode,
    /// User agent header.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            attempts: 3,
            initial_backoff: Duration::from_secs(5),
            tls: TlsMode::Probe,
            user_agent: format!("artisan/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_under_root() {
        let home = RegistryHome::new("/data/.artisan");
        assert_eq!(home.index_path(), PathBuf::from("/data/.artisan/repository.json"));
        assert_eq!(home.content_path("abc"), PathBuf::from("/data/.artisan/abc.zip"));
        assert_eq!(home.seal_path("abc"), PathBuf::from("/data/.artisan/abc.json"));
    }

    #[test]
    fn ensure_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let home = RegistryHome::new(dir.path().join("home"));
        home.ensure().unwrap();
        assert!(home.tmp_dir().is_dir());
    }

    #[test]
    fn client_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert_eq!(cfg.attempts, 3);
        assert_eq!(cfg.tls, TlsMode::Probe);
    }
}
