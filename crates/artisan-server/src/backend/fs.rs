//! Filesystem backend: `<root>/<group>/<name>/{repository.json,<ref>.zip,<ref>.json}`.

use super::{REPOSITORY_FILE, StorageBackend, repository_path, validate_file_name};
use artisan_core::{Error, Package, Repository, Result, json, validate_file_ref};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores repositories as directories under a root.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Backend rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn repository_dir(&self, group: &str, name: &str) -> PathBuf {
        self.root.join(group).join(name)
    }

    async fn read_repository(&self, path: &Path, fallback_name: String) -> Result<Repository> {
        match tokio::fs::read(path).await {
            Ok(bytes) => json::from_json_strict(&bytes, &path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Repository::new(fallback_name)),
            Err(e) => Err(Error::io(path, e)),
        }
    }
}

/// Write through a sibling temp file and rename over the target.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_file_name(format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        uuid::Uuid::new_v4().simple()
    ));
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| Error::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::io(path, e));
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

/// Every directory below `dir` that holds a repository document.
fn find_repositories(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            if path.join(REPOSITORY_FILE).is_file() {
                found.push(path.clone());
            }
            find_repositories(&path, found)?;
        }
    }
    Ok(())
}

#[async_trait]
impl StorageBackend for FsBackend {
    fn kind(&self) -> &'static str {
        "fs"
    }

    async fn upload(
        &self,
        group: &str,
        name: &str,
        file_ref: &str,
        content: Bytes,
        seal: Bytes,
        repository: &Repository,
    ) -> Result<()> {
        validate_file_ref(file_ref)?;
        let dir = self.repository_dir(group, name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io(&dir, e))?;
        write_atomic(&dir.join(format!("{file_ref}.zip")), &content).await?;
        write_atomic(&dir.join(format!("{file_ref}.json")), &seal).await?;
        self.put_repository_info(group, name, repository).await?;
        debug!(repository = %repository_path(group, name), file_ref, "package stored");
        Ok(())
    }

    async fn download(&self, group: &str, name: &str, filename: &str) -> Result<Bytes> {
        validate_file_name(filename)?;
        let path = self.repository_dir(group, name).join(filename);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(format!(
                "file {filename} in {}",
                repository_path(group, name)
            ))),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    async fn get_repository_info(&self, group: &str, name: &str) -> Result<Repository> {
        let path = self.repository_dir(group, name).join(REPOSITORY_FILE);
        self.read_repository(&path, repository_path(group, name))
            .await
    }

    async fn get_all_repository_info(&self) -> Result<Vec<Repository>> {
        let root = self.root.clone();
        let mut dirs = tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            find_repositories(&root, &mut found).map(|()| found)
        })
        .await
        .map_err(|e| Error::Transport(format!("repository scan failed: {e}")))??;
        dirs.sort();

        let mut repositories = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let fallback = dir
                .strip_prefix(&self.root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            repositories.push(
                self.read_repository(&dir.join(REPOSITORY_FILE), fallback)
                    .await?,
            );
        }
        Ok(repositories)
    }

    async fn put_repository_info(&self, group: &str, name: &str, repository: &Repository) -> Result<()> {
        let dir = self.repository_dir(group, name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::io(&dir, e))?;
        let body = json::to_json_pretty(repository)?;
        write_atomic(&dir.join(REPOSITORY_FILE), body.as_bytes()).await
    }

    async fn delete_package(&self, group: &str, name: &str, package: &Package) -> Result<()> {
        validate_file_ref(&package.file_ref)?;
        let mut repository = self.get_repository_info(group, name).await?;
        repository.remove_package(&package.id);
        self.put_repository_info(group, name, &repository).await?;

        let dir = self.repository_dir(group, name);
        remove_if_exists(&dir.join(format!("{}.zip", package.file_ref))).await?;
        remove_if_exists(&dir.join(format!("{}.json", package.file_ref))).await?;
        debug!(repository = %repository_path(group, name), id = %package.short_id(), "package deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisan_core::{Manifest, Seal};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sealed(file_ref: &str, body: &[u8], tag: &str) -> (Package, Bytes) {
        let manifest = Manifest {
            package_type: "content/zip".into(),
            reference: file_ref.into(),
            size: body.len() as u64,
            time: Utc::now(),
            labels: BTreeMap::new(),
        };
        let seal = Seal::compute(manifest, body).unwrap();
        let package = Package {
            id: seal.package_id().unwrap(),
            package_type: "content/zip".into(),
            file_ref: file_ref.into(),
            tags: vec![tag.into()],
            size: body.len() as u64,
            created: Utc::now(),
        };
        (package, Bytes::from(json::to_json(&seal).unwrap()))
    }

    async fn stored(backend: &FsBackend, group: &str, file_ref: &str, tag: &str) -> Package {
        let (package, seal) = sealed(file_ref, b"body", tag);
        let mut repo = backend.get_repository_info(group, "app").await.unwrap();
        repo.packages.push(package.clone());
        backend
            .upload(group, "app", file_ref, Bytes::from_static(b"body"), seal, &repo)
            .await
            .unwrap();
        package
    }

    #[tokio::test]
    async fn unknown_repository_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let repo = backend.get_repository_info("acme", "app").await.unwrap();
        assert_eq!(repo.repository, "acme/app");
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn upload_then_download_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        stored(&backend, "acme", "ref-a", "v1").await;

        let content = backend.download("acme", "app", "ref-a.zip").await.unwrap();
        assert_eq!(&content[..], b"body");
        let manifest = backend.get_package_manifest("acme", "app", "v1").await.unwrap();
        assert_eq!(manifest.reference, "ref-a");
        assert!(matches!(
            backend.get_package_manifest("acme", "app", "v9").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn download_rejects_traversal_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        assert!(matches!(
            backend.download("acme", "app", "../x").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            backend.download("acme", "app", "none.zip").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn upload_rejects_ref_outside_data_dir() {
        let root = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(root.path().join("data"));
        let (package, seal) = sealed("../../../escaped", b"body", "v1");
        let mut repo = Repository::new("acme/app");
        repo.packages.push(package.clone());

        let err = backend
            .upload("acme", "app", &package.file_ref, Bytes::from_static(b"body"), seal, &repo)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!root.path().join("escaped.zip").exists());
        assert!(backend.get_repository_info("acme", "app").await.unwrap().is_empty());
        assert!(matches!(
            backend.delete_package("acme", "app", &package).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn lists_nested_groups() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        stored(&backend, "acme", "ref-a", "v1").await;
        stored(&backend, "acme/tools", "ref-b", "v1").await;

        let all = backend.get_all_repository_info().await.unwrap();
        let names: Vec<&str> = all.iter().map(|r| r.repository.as_str()).collect();
        assert_eq!(names, vec!["acme/app", "acme/tools/app"]);
    }

    #[tokio::test]
    async fn package_info_crud() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let mut package = stored(&backend, "acme", "ref-a", "v1").await;

        package.add_tag("stable");
        backend.upsert_package_info("acme", "app", &package).await.unwrap();
        let repo = backend.get_repository_info("acme", "app").await.unwrap();
        assert_eq!(repo.find_by_id(&package.id).unwrap().tags, vec!["v1", "stable"]);

        backend.delete_package_info("acme", "app", &package.id).await.unwrap();
        assert!(backend.get_repository_info("acme", "app").await.unwrap().is_empty());
        assert!(matches!(
            backend.delete_package_info("acme", "app", &package.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(dir.path().join("acme/app/ref-a.zip").exists());
    }

    #[tokio::test]
    async fn delete_package_removes_files_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let package = stored(&backend, "acme", "ref-a", "v1").await;

        backend.delete_package("acme", "app", &package).await.unwrap();
        assert!(!dir.path().join("acme/app/ref-a.zip").exists());
        assert!(!dir.path().join("acme/app/ref-a.json").exists());
        assert!(backend.get_repository_info("acme", "app").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_metadata_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("acme/app")).unwrap();
        std::fs::write(dir.path().join("acme/app/repository.json"), "<html>").unwrap();
        let backend = FsBackend::new(dir.path());
        assert!(matches!(
            backend.get_repository_info("acme", "app").await,
            Err(Error::CorruptData(_))
        ));
    }
}
