//! Comparison of two snapshots of the same repository.

use crate::package::{Package, Repository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A package present on both sides whose tags differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedPackage {
    /// The package as it appears in the source snapshot.
    pub package: Package,
    /// Tags in source but not in target.
    pub tags_added: Vec<String>,
    /// Tags in target but not in source.
    pub tags_removed: Vec<String>,
}

/// Differences between a source and a target repository snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDiff {
    /// Packages only in the source.
    pub added: Vec<Package>,
    /// Packages only in the target.
    pub removed: Vec<Package>,
    /// Packages in both with different tag sets.
    pub updated: Vec<UpdatedPackage>,
}

impl RepositoryDiff {
    /// Compare `source` against `target`.
    ///
    /// An empty target yields every source package as added.
    #[must_use]
    pub fn between(source: &Repository, target: &Repository) -> Self {
        if target.is_empty() {
            return Self {
                added: source.packages.clone(),
                ..Self::default()
            };
        }

        let mut diff = Self::default();
        for src in &source.packages {
            match target.find_by_id(&src.id) {
                None => diff.added.push(src.clone()),
                Some(tgt) => {
                    let src_tags: BTreeSet<&String> = src.tags.iter().collect();
                    let tgt_tags: BTreeSet<&String> = tgt.tags.iter().collect();
                    if src_tags != tgt_tags {
                        diff.updated.push(UpdatedPackage {
                            package: src.clone(),
                            tags_added: src_tags.difference(&tgt_tags).map(|t| (*t).clone()).collect(),
                            tags_removed: tgt_tags.difference(&src_tags).map(|t| (*t).clone()).collect(),
                        });
                    }
                }
            }
        }
        diff.removed = target
            .packages
            .iter()
            .filter(|tgt| source.find_by_id(&tgt.id).is_none())
            .cloned()
            .collect();
        diff
    }

    /// Whether the snapshots are equivalent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pkg(id: &str, tags: &[&str]) -> Package {
        Package {
            id: id.into(),
            package_type: "content/zip".into(),
            file_ref: format!("ref-{id}"),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            size: 1,
            created: Utc::now(),
        }
    }

    fn repo(packages: Vec<Package>) -> Repository {
        Repository {
            repository: "acme/app".into(),
            packages,
        }
    }

    fn ids(packages: &[Package]) -> BTreeSet<String> {
        packages.iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn empty_target_bootstraps() {
        let src = repo(vec![pkg("a", &["v1"]), pkg("b", &[])]);
        let diff = RepositoryDiff::between(&src, &Repository::new("acme/app"));
        assert_eq!(diff.added.len(), 2);
        assert!(diff.removed.is_empty());
        assert!(diff.updated.is_empty());
    }

    #[test]
    fn classifies_added_removed_updated() {
        let src = repo(vec![pkg("a", &["v1", "latest"]), pkg("b", &["v2"])]);
        let tgt = repo(vec![pkg("a", &["v1", "old"]), pkg("c", &["v0"])]);
        let diff = RepositoryDiff::between(&src, &tgt);

        assert_eq!(ids(&diff.added), BTreeSet::from(["b".to_string()]));
        assert_eq!(ids(&diff.removed), BTreeSet::from(["c".to_string()]));
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].tags_added, vec!["latest"]);
        assert_eq!(diff.updated[0].tags_removed, vec!["old"]);
    }

    #[test]
    fn tag_order_is_not_a_change() {
        let src = repo(vec![pkg("a", &["v1", "latest"])]);
        let tgt = repo(vec![pkg("a", &["latest", "v1"])]);
        assert!(RepositoryDiff::between(&src, &tgt).is_empty());
    }

    #[test]
    fn added_and_removed_are_symmetric() {
        let a = repo(vec![pkg("x", &["1"]), pkg("y", &["2"])]);
        let b = repo(vec![pkg("y", &["2"]), pkg("z", &["3"])]);
        let ab = RepositoryDiff::between(&a, &b);
        let ba = RepositoryDiff::between(&b, &a);
        assert_eq!(ids(&ab.added), ids(&ba.removed));
        assert_eq!(ids(&ab.removed), ids(&ba.added));
    }
}
