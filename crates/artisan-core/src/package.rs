//! Packages and repositories as stored in registry indexes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::DIGEST_PREFIX;

/// One content-addressed artifact with zero or more tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Content identifier (`sha256:<hex>`), stable across repositories.
    pub id: String,
    /// Package type as recorded in the seal manifest.
    #[serde(rename = "type")]
    pub package_type: String,
    /// Filename stem shared by the content `.zip` and the seal `.json`.
    pub file_ref: String,
    /// Tags, in insertion order.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Content size in bytes.
    #[serde(default)]
    pub size: u64,
    /// When the package entered the index.
    pub created: DateTime<Utc>,
}

impl Package {
    /// Id without the digest prefix, truncated to 12 characters.
    #[must_use]
    pub fn short_id(&self) -> &str {
        let id = self.id.strip_prefix(DIGEST_PREFIX).unwrap_or(&self.id);
        id.get(..12).unwrap_or(id)
    }

    /// Whether the package holds `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Add a tag if not already present. Returns whether it was added.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        if self.has_tag(tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    /// Remove a tag. Returns whether it was present.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }

    /// A package with no tags.
    #[must_use]
    pub fn is_dangling(&self) -> bool {
        self.tags.is_empty()
    }

    /// Whether the id starts with `prefix`, with or without the digest prefix.
    #[must_use]
    pub fn id_matches(&self, prefix: &str) -> bool {
        if prefix.is_empty() {
            return false;
        }
        let bare = self.id.strip_prefix(DIGEST_PREFIX).unwrap_or(&self.id);
        self.id.starts_with(prefix) || bare.starts_with(prefix)
    }

    /// Copy of this package carrying a single tag, for cross-repository tagging.
    #[must_use]
    pub fn tag_only_copy(&self, tag: &str) -> Self {
        Self {
            tags: vec![tag.to_string()],
            ..self.clone()
        }
    }
}

/// All packages published under one repository name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Repository {
    /// Repository name (fully qualified locally, `group/name` on a server).
    pub repository: String,
    /// Packages, in insertion order.
    #[serde(default)]
    pub packages: Vec<Package>,
}

impl Repository {
    /// Create an empty repository.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            repository: name.into(),
            packages: Vec::new(),
        }
    }

    /// Whether the repository holds no packages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Package with the exact id.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.id == id)
    }

    /// Mutable package with the exact id.
    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Package> {
        self.packages.iter_mut().find(|p| p.id == id)
    }

    /// Package holding `tag`.
    #[must_use]
    pub fn find_by_tag(&self, tag: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.has_tag(tag))
    }

    /// Packages whose id starts with `prefix`.
    pub fn find_by_id_prefix<'a, 'p>(
        &'a self,
        prefix: &'p str,
    ) -> impl Iterator<Item = &'a Package> + use<'a, 'p> {
        self.packages.iter().filter(move |p| p.id_matches(prefix))
    }

    /// Replace the package with the same id, or append it.
    pub fn upsert_package(&mut self, package: Package) {
        match self.find_by_id_mut(&package.id) {
            Some(existing) => *existing = package,
            None => self.packages.push(package),
        }
    }

    /// Replace the package with the same id. Returns false if there is none.
    pub fn update_package(&mut self, package: Package) -> bool {
        match self.find_by_id_mut(&package.id) {
            Some(existing) => {
                *existing = package;
                true
            }
            None => false,
        }
    }

    /// Remove the package with the given id.
    pub fn remove_package(&mut self, id: &str) -> Option<Package> {
        let index = self.packages.iter().position(|p| p.id == id)?;
        Some(self.packages.remove(index))
    }

    /// Take `tag` away from whichever package other than `keep_id` holds it.
    ///
    /// A holder left without tags receives its `file_ref` as a fallback tag
    /// so it stays addressable. Returns the modified holder, if any.
    pub fn release_tag(&mut self, tag: &str, keep_id: &str) -> Option<Package> {
        let holder = self
            .packages
            .iter_mut()
            .find(|p| p.id != keep_id && p.has_tag(tag))?;
        holder.remove_tag(tag);
        if holder.is_dangling() {
            let fallback = holder.file_ref.clone();
            holder.add_tag(&fallback);
        }
        Some(holder.clone())
    }

    /// Remove `tag` from its holder with no fallback. Returns the holder after the change.
    pub fn untag(&mut self, tag: &str) -> Option<Package> {
        let holder = self.packages.iter_mut().find(|p| p.has_tag(tag))?;
        holder.remove_tag(tag);
        Some(holder.clone())
    }

    /// Remove and return every dangling package.
    pub fn take_dangling(&mut self) -> Vec<Package> {
        let (dangling, kept): (Vec<Package>, Vec<Package>) = std::mem::take(&mut self.packages)
            .into_iter()
            .partition(Package::is_dangling);
        self.packages = kept;
        dangling
    }
}

/// Human label for the time elapsed between `then` and `now`.
#[must_use]
pub fn elapsed_label(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (value, unit) = match secs {
        0..60 => return "less than a minute ago".to_string(),
        60..3_600 => (secs / 60, "minute"),
        3_600..86_400 => (secs / 3_600, "hour"),
        86_400..604_800 => (secs / 86_400, "day"),
        604_800..2_592_000 => (secs / 604_800, "week"),
        2_592_000..31_536_000 => (secs / 2_592_000, "month"),
        _ => (secs / 31_536_000, "year"),
    };
    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pkg(id: &str, file_ref: &str, tags: &[&str]) -> Package {
        Package {
            id: format!("sha256:{id}"),
            package_type: "content/zip".into(),
            file_ref: file_ref.into(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            size: 10,
            created: Utc::now(),
        }
    }

    #[test]
    fn short_id_strips_prefix() {
        let p = pkg("0123456789abcdef", "ref", &[]);
        assert_eq!(p.short_id(), "0123456789ab");
        assert!(p.id_matches("0123"));
        assert!(p.id_matches("sha256:0123"));
        assert!(!p.id_matches(""));
    }

    #[test]
    fn tags_are_a_set() {
        let mut p = pkg("aa", "ref", &["v1"]);
        assert!(!p.add_tag("v1"));
        assert!(p.add_tag("v2"));
        assert!(p.remove_tag("v1"));
        assert!(!p.remove_tag("v1"));
        assert_eq!(p.tags, vec!["v2"]);
    }

    #[test]
    fn release_tag_leaves_fallback() {
        let mut repo = Repository::new("acme/app");
        repo.packages.push(pkg("aa", "ref-a", &["latest"]));
        repo.packages.push(pkg("bb", "ref-b", &[]));

        let changed = repo.release_tag("latest", "sha256:bb").unwrap();
        assert_eq!(changed.tags, vec!["ref-a"]);
        assert!(repo.find_by_tag("latest").is_none());
    }

    #[test]
    fn release_tag_skips_keeper() {
        let mut repo = Repository::new("acme/app");
        repo.packages.push(pkg("aa", "ref-a", &["latest", "v1"]));
        assert!(repo.release_tag("latest", "sha256:aa").is_none());
        let changed = repo.release_tag("v1", "sha256:zz").unwrap();
        assert_eq!(changed.tags, vec!["latest"]);
    }

    #[test]
    fn upsert_and_take_dangling() {
        let mut repo = Repository::new("acme/app");
        repo.upsert_package(pkg("aa", "ref-a", &["v1"]));
        repo.upsert_package(pkg("bb", "ref-b", &[]));
        repo.upsert_package(pkg("aa", "ref-a", &["v1", "v2"]));
        assert_eq!(repo.packages.len(), 2);
        assert_eq!(repo.find_by_tag("v2").unwrap().id, "sha256:aa");

        let dangling = repo.take_dangling();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].file_ref, "ref-b");
        assert_eq!(repo.packages.len(), 1);
    }

    #[test]
    fn update_requires_existing() {
        let mut repo = Repository::new("acme/app");
        assert!(!repo.update_package(pkg("aa", "ref", &["v1"])));
        repo.packages.push(pkg("aa", "ref", &[]));
        assert!(repo.update_package(pkg("aa", "ref", &["v1"])));
        assert!(repo.remove_package("sha256:aa").is_some());
        assert!(repo.is_empty());
    }

    #[test]
    fn elapsed_labels() {
        let now = Utc::now();
        assert_eq!(elapsed_label(now, now), "less than a minute ago");
        assert_eq!(elapsed_label(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(elapsed_label(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(elapsed_label(now - Duration::days(3), now), "3 days ago");
        assert_eq!(elapsed_label(now - Duration::days(800), now), "2 years ago");
    }
}
