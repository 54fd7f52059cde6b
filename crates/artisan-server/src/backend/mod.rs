//! Storage backends for package content and repository metadata.
//!
//! A backend stores, per repository, the metadata document
//! (`repository.json`) and the `<file_ref>.zip`/`<file_ref>.json` pair of
//! every package. Handlers only talk to [`StorageBackend`]; a new backend
//! needs the primitives below and inherits the metadata helpers.

mod fs;
mod nexus;

pub use fs::FsBackend;
pub use nexus::Nexus3Backend;

use artisan_core::{Error, Manifest, Package, Repository, Result, Seal};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

/// Metadata document name inside each repository.
pub const REPOSITORY_FILE: &str = "repository.json";

/// `group/name`, the key repositories are stored under.
#[must_use]
pub fn repository_path(group: &str, name: &str) -> String {
    format!("{group}/{name}")
}

/// Reject file names that would escape the repository directory.
///
/// # Errors
/// Returns [`Error::Validation`] for names with separators or dot segments.
pub fn validate_file_name(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\'])
    {
        return Err(Error::validation(format!("invalid file name '{filename}'")));
    }
    Ok(())
}

/// Persistence used by the registry server.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Short name for logs.
    fn kind(&self) -> &'static str;

    /// Store a package's content and seal, then write `repository` as the
    /// repository's metadata.
    async fn upload(
        &self,
        group: &str,
        name: &str,
        file_ref: &str,
        content: Bytes,
        seal: Bytes,
        repository: &Repository,
    ) -> Result<()>;

    /// Read one stored file of a repository.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if it does not exist.
    async fn download(&self, group: &str, name: &str, filename: &str) -> Result<Bytes>;

    /// Repository metadata; an unknown repository is empty.
    async fn get_repository_info(&self, group: &str, name: &str) -> Result<Repository>;

    /// Metadata of every repository.
    async fn get_all_repository_info(&self) -> Result<Vec<Repository>>;

    /// Replace a repository's metadata document.
    async fn put_repository_info(&self, group: &str, name: &str, repository: &Repository) -> Result<()>;

    /// Delete a package's content and seal and drop it from the metadata.
    async fn delete_package(&self, group: &str, name: &str, package: &Package) -> Result<()>;

    /// Insert or replace one package's metadata.
    async fn upsert_package_info(&self, group: &str, name: &str, package: &Package) -> Result<()> {
        let mut repository = self.get_repository_info(group, name).await?;
        repository.upsert_package(package.clone());
        self.put_repository_info(group, name, &repository).await
    }

    /// Drop one package's metadata, keeping its files.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no package has this id.
    async fn delete_package_info(&self, group: &str, name: &str, id: &str) -> Result<()> {
        let mut repository = self.get_repository_info(group, name).await?;
        if repository.remove_package(id).is_none() {
            return Err(Error::not_found(format!(
                "package {id} in {}",
                repository_path(group, name)
            )));
        }
        self.put_repository_info(group, name, &repository).await
    }

    /// Manifest from the seal of the package holding `tag`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if no package holds the tag.
    async fn get_package_manifest(&self, group: &str, name: &str, tag: &str) -> Result<Manifest> {
        let repository = self.get_repository_info(group, name).await?;
        let package = repository.find_by_tag(tag).ok_or_else(|| {
            Error::not_found(format!("tag {tag} in {}", repository_path(group, name)))
        })?;
        let seal = self
            .download(group, name, &format!("{}.json", package.file_ref))
            .await?;
        Ok(Seal::from_slice(&seal)?.manifest)
    }
}
