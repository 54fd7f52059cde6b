//! The client-side package index.
//!
//! One JSON document maps repository names to packages and tags. It is
//! loaded whole when the index opens, mutated in memory and rewritten
//! atomically after every change. Content archives and seals live next to
//! the document as `<file_ref>.zip` and `<file_ref>.json`; they are shared
//! by every repository entry that references the same package id and are
//! deleted only when no entry references that id any more.
//!
//! Concurrent processes working on the same home are not serialized; the
//! last full write wins.

use crate::config::RegistryHome;
use artisan_core::{
    Error, Package, PackageName, Repository, Result, Seal, json, validate_file_ref,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Label shown for a package that has no tags.
pub const NO_TAG: &str = "<none>";

/// The persisted index document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Repositories keyed by fully qualified name.
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl IndexDocument {
    /// Repository by name.
    #[must_use]
    pub fn repository(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.repository == name)
    }

    fn repository_mut(&mut self, name: &str) -> Option<&mut Repository> {
        self.repositories.iter_mut().find(|r| r.repository == name)
    }

    pub(crate) fn repository_or_create(&mut self, name: &str) -> &mut Repository {
        let index = match self.repositories.iter().position(|r| r.repository == name) {
            Some(index) => index,
            None => {
                self.repositories.push(Repository::new(name));
                self.repositories.len() - 1
            }
        };
        &mut self.repositories[index]
    }

    /// Whether any repository references the package id.
    #[must_use]
    pub fn references(&self, id: &str) -> bool {
        self.repositories.iter().any(|r| r.find_by_id(id).is_some())
    }
}

/// Persistence for [`IndexDocument`].
pub trait IndexStore: Send + Sync + fmt::Debug {
    /// Load the document; a missing document is an empty index.
    ///
    /// # Errors
    /// Returns error if the document exists but cannot be read or parsed.
    fn load(&self) -> Result<IndexDocument>;

    /// Replace the persisted document.
    ///
    /// # Errors
    /// Returns error if the document cannot be written.
    fn save(&self, doc: &IndexDocument) -> Result<()>;
}

/// Stores the index as one JSON file, rewritten through a temp file + rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IndexStore for JsonFileStore {
    fn load(&self) -> Result<IndexDocument> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(IndexDocument::default());
            }
            Err(e) => return Err(Error::io(&self.path, e)),
        };
        json::from_json_strict(&bytes, &self.path.display().to_string())
    }

    fn save(&self, doc: &IndexDocument) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

        let content = json::to_json_pretty(doc)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
        temp.write_all(content.as_bytes())
            .map_err(|e| Error::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::io(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| Error::io(&self.path, e.error))?;

        debug!(path = %self.path.display(), "index saved");
        Ok(())
    }
}

/// What a single `remove` reference resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Removal {
    Tag { repository: String, tag: String },
    Record { repository: String, id: String },
}

impl fmt::Display for Removal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag { repository, tag } => write!(f, "{repository}:{tag}"),
            Self::Record { repository, id } => write!(f, "{repository}@{id}"),
        }
    }
}

/// One row of an index listing.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry<'a> {
    /// Repository name.
    pub repository: &'a str,
    /// Tag, `None` for a dangling package.
    pub tag: Option<&'a str>,
    /// The package.
    pub package: &'a Package,
}

impl IndexEntry<'_> {
    /// Tag or [`NO_TAG`].
    #[must_use]
    pub fn tag_label(&self) -> &str {
        self.tag.unwrap_or(NO_TAG)
    }
}

/// The local package index.
#[derive(Debug)]
pub struct LocalIndex<S: IndexStore = JsonFileStore> {
    home: RegistryHome,
    store: S,
    doc: IndexDocument,
}

impl LocalIndex<JsonFileStore> {
    /// Open the index under `home`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns error if the home cannot be created or the index is corrupt.
    pub fn open(home: RegistryHome) -> Result<Self> {
        home.ensure()?;
        let store = JsonFileStore::new(home.index_path());
        Self::with_store(home, store)
    }
}

impl<S: IndexStore> LocalIndex<S> {
    /// Open with an explicit store.
    ///
    /// # Errors
    /// Returns error if the store cannot load the document.
    pub fn with_store(home: RegistryHome, store: S) -> Result<Self> {
        let doc = store.load()?;
        Ok(Self { home, store, doc })
    }

    /// Registry home.
    #[must_use]
    pub const fn home(&self) -> &RegistryHome {
        &self.home
    }

    /// All repositories.
    #[must_use]
    pub fn repositories(&self) -> &[Repository] {
        &self.doc.repositories
    }

    /// The package a name resolves to.
    #[must_use]
    pub fn find(&self, name: &PackageName) -> Option<&Package> {
        self.doc
            .repository(&name.fully_qualified_name())?
            .find_by_tag(name.tag())
    }

    /// The package with the exact id, in any repository.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&Package> {
        self.doc
            .repositories
            .iter()
            .find_map(|r| r.find_by_id(id))
    }

    /// `(repository, package)` pairs whose id starts with `prefix`.
    #[must_use]
    pub fn find_by_id_prefix(&self, prefix: &str) -> Vec<(&str, &Package)> {
        self.doc
            .repositories
            .iter()
            .flat_map(|r| {
                r.find_by_id_prefix(prefix)
                    .map(move |p| (r.repository.as_str(), p))
            })
            .collect()
    }

    /// Add new content under `name`.
    ///
    /// The content archive at `content` and the seal are copied into the
    /// home under the seal's file reference. The tag is taken from its
    /// current holder first, and packages left without tags in the target
    /// repository are removed.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] if the seal's file reference is not a
    /// plain file stem, and [`Error::Conflict`] if content with the same
    /// file reference is already stored.
    pub fn add(&mut self, content: &Path, name: &PackageName, seal: &Seal) -> Result<Package> {
        validate_file_ref(&seal.manifest.reference)?;
        let file_ref = seal.manifest.reference.clone();
        let content_path = self.home.content_path(&file_ref);
        let seal_path = self.home.seal_path(&file_ref);
        if content_path.exists() || seal_path.exists() {
            return Err(Error::Conflict(format!(
                "package content '{file_ref}' already exists in the local registry"
            )));
        }

        let id = seal.package_id()?;
        let size = std::fs::metadata(content)
            .map_err(|e| Error::io(content, e))?
            .len();
        std::fs::copy(content, &content_path).map_err(|e| Error::io(&content_path, e))?;
        std::fs::write(&seal_path, json::to_json_pretty(seal)?)
            .map_err(|e| Error::io(&seal_path, e))?;

        let repo_name = name.fully_qualified_name();
        let repo = self.doc.repository_or_create(&repo_name);
        repo.untag(name.tag());
        let dangling = repo.take_dangling();

        let package = Package {
            id,
            package_type: seal.manifest.package_type.clone(),
            file_ref,
            tags: vec![name.tag().to_string()],
            size,
            created: Utc::now(),
        };
        repo.packages.push(package.clone());

        self.save()?;
        for old in &dangling {
            self.remove_content_if_unreferenced(old)?;
        }

        info!(name = %name, id = %package.short_id(), "package added");
        Ok(package)
    }

    /// Give the package `source` resolves to the name `target`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `source` does not resolve.
    pub fn tag(&mut self, source: &PackageName, target: &PackageName) -> Result<()> {
        let package = self
            .find(source)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("package {source}")))?;
        self.link(&package, target)?;
        info!(source = %source, target = %target, "package tagged");
        Ok(())
    }

    /// Make `target` point at an already stored package.
    ///
    /// Within the target repository the tag is first released by any other
    /// holder (which keeps its file reference as a fallback tag if left
    /// without tags). Then the tag is added to the package's record there,
    /// or a tag-only record is appended.
    ///
    /// # Errors
    /// Returns error if the index cannot be saved.
    pub fn link(&mut self, package: &Package, target: &PackageName) -> Result<()> {
        let repo = self
            .doc
            .repository_or_create(&target.fully_qualified_name());
        repo.release_tag(target.tag(), &package.id);
        match repo.find_by_id_mut(&package.id) {
            Some(existing) => {
                existing.add_tag(target.tag());
            }
            None => repo.packages.push(package.tag_only_copy(target.tag())),
        }
        self.save()
    }

    /// Remove packages by name or id prefix.
    ///
    /// A reference that parses as a name and resolves removes that tag.
    /// Otherwise it is taken as an id prefix and every tag of every matching
    /// package is removed; a matching package without tags is dropped.
    /// Returns the removed `repository:tag` pairs (`repository@id` for
    /// untagged packages).
    ///
    /// Every reference is resolved before anything changes, and content
    /// files are deleted only after the index is saved.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if a reference matches nothing; the
    /// index is then left untouched.
    pub fn remove(&mut self, refs: &[String]) -> Result<Vec<String>> {
        let mut targets = Vec::new();
        for reference in refs {
            let resolved = self.resolve(reference);
            if resolved.is_empty() {
                return Err(Error::not_found(format!("package {reference}")));
            }
            targets.extend(resolved);
        }

        let mut removed = Vec::new();
        let mut orphaned = Vec::new();
        for target in targets {
            let label = target.to_string();
            let dropped = match target {
                Removal::Tag { repository, tag } => self.drop_tag(&repository, &tag),
                Removal::Record { repository, id } => self.drop_record(&repository, &id),
            };
            if let Some(package) = dropped.filter(Package::is_dangling) {
                orphaned.push(package);
            }
            removed.push(label);
        }

        self.save()?;
        for package in &orphaned {
            self.remove_content_if_unreferenced(package)?;
        }
        Ok(removed)
    }

    fn resolve(&self, reference: &str) -> Vec<Removal> {
        if let Ok(name) = PackageName::parse(reference)
            && self.find(&name).is_some()
        {
            return vec![Removal::Tag {
                repository: name.fully_qualified_name(),
                tag: name.tag().to_string(),
            }];
        }
        self.find_by_id_prefix(reference)
            .into_iter()
            .flat_map(|(repo, p)| {
                if p.is_dangling() {
                    vec![Removal::Record {
                        repository: repo.to_string(),
                        id: p.id.clone(),
                    }]
                } else {
                    p.tags
                        .iter()
                        .map(|t| Removal::Tag {
                            repository: repo.to_string(),
                            tag: t.clone(),
                        })
                        .collect()
                }
            })
            .collect()
    }

    /// Untag in memory; returns the holder, dropping its record when it is
    /// left dangling.
    fn drop_tag(&mut self, repo_name: &str, tag: &str) -> Option<Package> {
        let repo = self.doc.repository_mut(repo_name)?;
        let holder = repo.untag(tag)?;
        if holder.is_dangling() {
            self.drop_record(repo_name, &holder.id);
        }
        Some(holder)
    }

    fn drop_record(&mut self, repo_name: &str, id: &str) -> Option<Package> {
        let repo = self.doc.repository_mut(repo_name)?;
        let package = repo.remove_package(id)?;
        if repo.is_empty() {
            self.doc.repositories.retain(|r| r.repository != repo_name);
        }
        Some(package)
    }

    /// Remove every dangling package. Returns how many were removed.
    ///
    /// # Errors
    /// Returns error if content cannot be deleted or the index saved.
    pub fn prune(&mut self) -> Result<usize> {
        let mut dangling = Vec::new();
        for repo in &mut self.doc.repositories {
            dangling.extend(repo.take_dangling());
        }
        self.doc.repositories.retain(|r| !r.is_empty());
        self.save()?;
        for package in &dangling {
            self.remove_content_if_unreferenced(package)?;
        }
        info!(count = dangling.len(), "dangling packages pruned");
        Ok(dangling.len())
    }

    /// One entry per tag, plus one per dangling package, in index order.
    #[must_use]
    pub fn list(&self) -> Vec<IndexEntry<'_>> {
        let mut entries = Vec::new();
        for repo in &self.doc.repositories {
            for package in &repo.packages {
                if package.is_dangling() {
                    entries.push(IndexEntry {
                        repository: &repo.repository,
                        tag: None,
                        package,
                    });
                }
                for tag in &package.tags {
                    entries.push(IndexEntry {
                        repository: &repo.repository,
                        tag: Some(tag),
                        package,
                    });
                }
            }
        }
        entries
    }

    /// Short ids, one per package record.
    #[must_use]
    pub fn list_quiet(&self) -> Vec<String> {
        self.doc
            .repositories
            .iter()
            .flat_map(|r| r.packages.iter().map(|p| p.short_id().to_string()))
            .collect()
    }

    /// Read a stored package's content archive.
    ///
    /// # Errors
    /// Returns IO error if the file is missing.
    pub fn read_content(&self, package: &Package) -> Result<Vec<u8>> {
        let path = self.home.content_path(&package.file_ref);
        std::fs::read(&path).map_err(|e| Error::io(&path, e))
    }

    /// Read a stored package's seal.
    ///
    /// # Errors
    /// Returns error if the seal is missing or corrupt.
    pub fn read_seal(&self, package: &Package) -> Result<Seal> {
        let path = self.home.seal_path(&package.file_ref);
        let bytes = std::fs::read(&path).map_err(|e| Error::io(&path, e))?;
        Seal::from_slice(&bytes)
    }

    fn remove_content_if_unreferenced(&self, package: &Package) -> Result<()> {
        if self.doc.references(&package.id) {
            debug!(id = %package.short_id(), "content still referenced, keeping files");
            return Ok(());
        }
        for path in [
            self.home.content_path(&package.file_ref),
            self.home.seal_path(&package.file_ref),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed package file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(&path, e)),
            }
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        self.store.save(&self.doc)
    }
}
