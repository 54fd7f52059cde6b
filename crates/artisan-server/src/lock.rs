//! Per-repository write locks backed by marker files.
//!
//! A repository is locked while `<dir>/<sha256(repository)>.lock` exists.
//! Markers are created exclusively, so at most one writer holds a
//! repository at a time, across tasks and across processes sharing the
//! directory. Each marker carries its holder's token, and a holder only
//! refreshes or deletes a marker that still carries its own token. A holder
//! refreshes the marker's modification time while it works; a marker older
//! than the lease TTL belongs to a crashed holder and may be reclaimed.

use artisan_core::{Digest, Error, Result};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Issues [`LockGuard`]s for repository paths.
#[derive(Debug, Clone)]
pub struct RepositoryLock {
    dir: PathBuf,
    ttl: Duration,
    wait: Duration,
}

impl RepositoryLock {
    /// Locks stored under `dir`; markers older than `ttl` are stale.
    /// [`acquire`](Self::acquire) does not wait until [`with_wait`](Self::with_wait) says so.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            wait: Duration::ZERO,
        }
    }

    /// How long [`acquire`](Self::acquire) waits for a live holder.
    #[must_use]
    pub const fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Lease length.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Marker file for `repository`.
    #[must_use]
    pub fn marker_path(&self, repository: &str) -> PathBuf {
        let digest = Digest::of(repository.as_bytes());
        self.dir.join(format!("{}.lock", digest.to_hex()))
    }

    /// Whether a marker exists for `repository`.
    #[must_use]
    pub fn is_locked(&self, repository: &str) -> bool {
        self.marker_path(repository).exists()
    }

    /// Take the lock, retrying while another holder has it until the wait
    /// deadline passes.
    ///
    /// # Errors
    /// Returns [`Error::Locked`] if the holder outlives the deadline.
    pub async fn acquire(&self, repository: &str) -> Result<LockGuard> {
        let until = Instant::now() + self.wait;
        loop {
            match self.try_acquire(repository) {
                Err(Error::Locked { .. }) if Instant::now() < until => {
                    let left = until.saturating_duration_since(Instant::now());
                    tokio::time::sleep(POLL_INTERVAL.min(left)).await;
                }
                result => return result,
            }
        }
    }

    /// Take the lock without waiting.
    ///
    /// A stale marker is reclaimed first. The returned guard releases the
    /// lock when dropped.
    ///
    /// # Errors
    /// Returns [`Error::Locked`] if another holder has a live marker.
    pub fn try_acquire(&self, repository: &str) -> Result<LockGuard> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        let path = self.marker_path(repository);
        let token = Uuid::new_v4().to_string();

        match create_marker(&path, &token) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !self.try_release(repository, self.ttl)? {
                    debug!(repository, "lock denied");
                    return Err(Error::Locked {
                        repository: repository.to_string(),
                    });
                }
                create_marker(&path, &token).map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => Error::Locked {
                        repository: repository.to_string(),
                    },
                    _ => Error::io(&path, e),
                })?;
            }
            Err(e) => return Err(Error::io(&path, e)),
        }

        debug!(repository, path = %path.display(), "lock acquired");
        Ok(LockGuard {
            heartbeat: spawn_heartbeat(path.clone(), token.clone(), self.ttl),
            path,
            token,
            repository: repository.to_string(),
            released: false,
        })
    }

    /// Delete the marker if it is older than `max_age`.
    ///
    /// Returns true when the repository is unlocked afterwards.
    ///
    /// # Errors
    /// Returns IO error if the marker cannot be inspected or deleted.
    pub fn try_release(&self, repository: &str, max_age: Duration) -> Result<bool> {
        let path = self.marker_path(repository);
        let Some(age) = marker_age(&path)? else {
            return Ok(true);
        };
        if age <= max_age {
            return Ok(false);
        }
        warn!(
            repository,
            age_secs = age.as_secs(),
            "reclaiming abandoned repository lock"
        );
        remove_marker(&path)?;
        Ok(true)
    }
}

fn create_marker(path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(token.as_bytes())
}

/// Whether the marker at `path` still carries `token`.
fn holds(path: &Path, token: &str) -> Result<bool> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content == token),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Delete the marker only while it carries `token`. Returns whether it did.
fn remove_own_marker(path: &Path, token: &str) -> Result<bool> {
    if !holds(path, token)? {
        return Ok(false);
    }
    remove_marker(path)
}

fn remove_marker(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn marker_age(path: &Path) -> Result<Option<Duration>> {
    let modified = match std::fs::metadata(path) {
        Ok(meta) => meta.modified().map_err(|e| Error::io(path, e))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    Ok(Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default(),
    ))
}

fn touch(path: &Path) -> std::io::Result<()> {
    OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

/// Refresh the marker every third of the TTL while the guard lives and the
/// marker is still ours.
fn spawn_heartbeat(path: PathBuf, token: String, ttl: Duration) -> Option<JoinHandle<()>> {
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let period = (ttl / 3).max(Duration::from_millis(10));
    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !matches!(holds(&path, &token), Ok(true)) {
                warn!(path = %path.display(), "lock marker taken over, heartbeat stopped");
                break;
            }
            if let Err(e) = touch(&path) {
                debug!(path = %path.display(), error = %e, "lock heartbeat stopped");
                break;
            }
        }
    }))
}

/// A held repository lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: String,
    repository: String,
    heartbeat: Option<JoinHandle<()>>,
    released: bool,
}

impl LockGuard {
    /// Repository this guard locks.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Release now, reporting failures that drop would only log.
    ///
    /// # Errors
    /// Returns IO error if the marker cannot be deleted.
    pub fn release(mut self) -> Result<()> {
        self.stop_heartbeat();
        self.released = true;
        if remove_own_marker(&self.path, &self.token)? {
            info!(repository = %self.repository, "lock released");
        } else {
            warn!(repository = %self.repository, "lock was reclaimed by another holder");
        }
        Ok(())
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.stop_heartbeat();
        if self.released {
            return;
        }
        match remove_own_marker(&self.path, &self.token) {
            Ok(true) => debug!(repository = %self.repository, "lock released on drop"),
            Ok(false) => warn!(repository = %self.repository, "lock was reclaimed by another holder"),
            Err(e) => warn!(repository = %self.repository, error = %e, "failed to release lock"),
        }
    }
}
