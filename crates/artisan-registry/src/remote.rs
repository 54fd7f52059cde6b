//! Bulk administration of a remote registry.

use crate::api::RegistryApi;
use crate::client::with_retry;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::retry::RetryPolicy;
use artisan_core::{Credentials, Error, Package, PackageName};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One row of a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// `domain/group/name`.
    pub repository: String,
    /// Tag, `None` for a dangling package.
    pub tag: Option<String>,
    /// The package.
    pub package: Package,
}

/// Reject domains carrying a scheme, a path or whitespace.
///
/// # Errors
/// Returns [`Error::Validation`] describing the problem.
pub fn validate_domain(domain: &str) -> artisan_core::Result<()> {
    if domain.is_empty() {
        return Err(Error::validation("registry domain is empty"));
    }
    if domain.contains("://") {
        return Err(Error::validation(format!(
            "registry domain '{domain}' must not include a scheme"
        )));
    }
    if domain.contains('/') || domain.chars().any(char::is_whitespace) {
        return Err(Error::validation(format!(
            "registry domain '{domain}' must be a host with an optional port"
        )));
    }
    Ok(())
}

fn split_repository(repository: &str) -> Option<(&str, &str)> {
    repository.rsplit_once('/')
}

/// List and remove packages on one remote registry.
#[derive(Debug)]
pub struct RemoteAdmin {
    api: RegistryApi,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RemoteAdmin {
    /// Administer `domain` with `credentials`.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for a malformed domain.
    pub fn new(domain: &str, credentials: Credentials, config: &ClientConfig) -> Result<Self> {
        validate_domain(domain)?;
        Ok(Self {
            api: RegistryApi::new(domain, credentials, config)?,
            policy: RetryPolicy::new(config.attempts, config.initial_backoff),
            cancel: CancellationToken::new(),
        })
    }

    /// Registry domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.api.domain()
    }

    /// Token that aborts in-flight retries when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Every tag of every package, plus one row per dangling package.
    ///
    /// # Errors
    /// Returns error if the registry cannot be listed.
    pub async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let repositories = with_retry(self.policy, &self.cancel, || {
            self.api.get_all_repository_info()
        })
        .await?;

        let mut entries = Vec::new();
        for repo in repositories {
            let repository = format!("{}/{}", self.domain(), repo.repository);
            for package in repo.packages {
                if package.is_dangling() {
                    entries.push(RemoteEntry {
                        repository: repository.clone(),
                        tag: None,
                        package: package.clone(),
                    });
                }
                for tag in &package.tags {
                    entries.push(RemoteEntry {
                        repository: repository.clone(),
                        tag: Some(tag.clone()),
                        package: package.clone(),
                    });
                }
            }
        }
        Ok(entries)
    }

    /// Short ids, one per package.
    ///
    /// # Errors
    /// Returns error if the registry cannot be listed.
    pub async fn list_quiet(&self) -> Result<Vec<String>> {
        let repositories = with_retry(self.policy, &self.cancel, || {
            self.api.get_all_repository_info()
        })
        .await?;
        Ok(repositories
            .iter()
            .flat_map(|r| r.packages.iter().map(|p| p.short_id().to_string()))
            .collect())
    }

    /// Remove every tag whose `domain/group/name:tag` matches `pattern`.
    ///
    /// A package keeping other tags only loses the tag; the last tag takes
    /// the content with it. With `dry_run` nothing is changed. Returns the
    /// matched references.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for an invalid pattern, or the first
    /// failed remote call.
    pub async fn remove_by_filter(&self, pattern: &str, dry_run: bool) -> Result<Vec<String>> {
        let filter = Regex::new(pattern)
            .map_err(|e| Error::validation(format!("invalid filter '{pattern}': {e}")))?;
        let repositories = with_retry(self.policy, &self.cancel, || {
            self.api.get_all_repository_info()
        })
        .await?;

        let mut removed = Vec::new();
        for repo in &repositories {
            let Some((group, name)) = split_repository(&repo.repository) else {
                warn!(repository = %repo.repository, "skipping repository without a group");
                continue;
            };
            for package in &repo.packages {
                let matched: Vec<&str> = package
                    .tags
                    .iter()
                    .map(String::as_str)
                    .filter(|tag| {
                        filter.is_match(&format!("{}/{}:{tag}", self.domain(), repo.repository))
                    })
                    .collect();
                if matched.is_empty() {
                    continue;
                }
                removed.extend(
                    matched
                        .iter()
                        .map(|tag| format!("{}/{}:{tag}", self.domain(), repo.repository)),
                );
                if !dry_run {
                    self.remove_tags(group, name, package, &matched).await?;
                }
            }
        }

        info!(domain = self.domain(), count = removed.len(), dry_run, "remote removal by filter");
        Ok(removed)
    }

    /// Remove packages by full name or by id prefix.
    ///
    /// A name that resolves on the remote removes that tag. Anything else is
    /// an id prefix: every tag of every matching package is removed.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if a reference matches nothing.
    pub async fn remove_by_name_or_id(&self, refs: &[String]) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for reference in refs {
            if let Ok(name) = PackageName::parse(reference) {
                let (group, repo) = (name.group(), name.name());
                let remote = with_retry(self.policy, &self.cancel, || {
                    self.api.get_repository_info(group, repo)
                })
                .await?;
                if let Some(package) = remote.find_by_tag(name.tag()) {
                    self.remove_tags(group, repo, package, &[name.tag()]).await?;
                    removed.push(format!("{}/{}:{}", self.domain(), name.repository(), name.tag()));
                    continue;
                }
            }

            let repositories = with_retry(self.policy, &self.cancel, || {
                self.api.get_all_repository_info()
            })
            .await?;
            let before = removed.len();
            for repo in &repositories {
                let Some((group, name)) = split_repository(&repo.repository) else {
                    continue;
                };
                for package in repo.find_by_id_prefix(reference) {
                    let tags: Vec<&str> = package.tags.iter().map(String::as_str).collect();
                    self.remove_tags(group, name, package, &tags).await?;
                    removed.extend(
                        tags.iter()
                            .map(|t| format!("{}/{}:{t}", self.domain(), repo.repository)),
                    );
                }
            }
            if removed.len() == before {
                return Err(Error::not_found(format!("package {reference} on {}", self.domain())).into());
            }
        }
        Ok(removed)
    }

    /// Drop `tags` from `package`: metadata updates while other tags remain,
    /// a tag deletion (which removes the content) for the last one.
    async fn remove_tags(&self, group: &str, name: &str, package: &Package, tags: &[&str]) -> Result<()> {
        let mut remaining = package.clone();
        for tag in tags {
            if remaining.tags.len() > 1 {
                remaining.remove_tag(tag);
                with_retry(self.policy, &self.cancel, || {
                    self.api.put_package_info(group, name, &remaining)
                })
                .await?;
            } else {
                with_retry(self.policy, &self.cancel, || self.api.delete_tag(group, name, tag)).await?;
            }
            info!(repository = %format!("{group}/{name}"), tag, "remote tag removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsMode;
    use artisan_core::{Repository, json};
    use chrono::Utc;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn package(id: &str, tags: &[&str]) -> Package {
        Package {
            id: format!("sha256:{id}"),
            package_type: "content/zip".into(),
            file_ref: format!("ref-{id}"),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            size: 10,
            created: Utc::now(),
        }
    }

    async fn admin_with(repos: Vec<Repository>) -> (MockServer, RemoteAdmin) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repository"))
            .respond_with(ResponseTemplate::new(200).set_body_string(json::to_json(&repos).unwrap()))
            .mount(&server)
            .await;
        let config = ClientConfig {
            tls: TlsMode::Disable,
            initial_backoff: Duration::from_millis(1),
            ..ClientConfig::default()
        };
        let domain = server.uri().trim_start_matches("http://").to_string();
        let admin = RemoteAdmin::new(&domain, Credentials::new("admin", "admin"), &config).unwrap();
        (server, admin)
    }

    fn repo(name: &str, packages: Vec<Package>) -> Repository {
        let mut r = Repository::new(name);
        r.packages = packages;
        r
    }

    #[test]
    fn domain_validation() {
        assert!(validate_domain("registry.example.com:8082").is_ok());
        assert!(validate_domain("https://registry.example.com").is_err());
        assert!(validate_domain("registry.example.com/acme").is_err());
        assert!(validate_domain("").is_err());
    }

    #[tokio::test]
    async fn list_rows_and_quiet_ids() {
        let (_server, admin) = admin_with(vec![repo(
            "acme/app",
            vec![
                package("aaaaaaaaaaaaaaaa", &["v1", "latest"]),
                package("bbbbbbbbbbbbbbbb", &[]),
            ],
        )])
        .await;

        let rows = admin.list().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].repository.ends_with("/acme/app"));
        assert_eq!(rows[2].tag, None);

        let ids = admin.list_quiet().await.unwrap();
        assert_eq!(ids, vec!["aaaaaaaaaaaa", "bbbbbbbbbbbb"]);
    }

    #[tokio::test]
    async fn dry_run_reports_without_calls() {
        let (server, admin) = admin_with(vec![repo(
            "acme/app",
            vec![package("aaaaaaaaaaaaaaaa", &["v1", "v2"])],
        )])
        .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let removed = admin.remove_by_filter(r":v\d$", true).await.unwrap();
        assert_eq!(removed.len(), 2);
    }

    #[tokio::test]
    async fn filter_updates_metadata_then_deletes_last_tag() {
        let (server, admin) = admin_with(vec![repo(
            "acme/app",
            vec![
                package("aaaaaaaaaaaaaaaa", &["v1", "v2"]),
                package("cccccccccccccccc", &["stable"]),
            ],
        )])
        .await;
        Mock::given(method("PUT"))
            .and(path("/package/info/acme/app/id/sha256:aaaaaaaaaaaaaaaa"))
            .and(body_string_contains("\"tags\":[\"v2\"]"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/package/acme/app/tag/v2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let removed = admin.remove_by_filter("app:v", false).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|r| r.contains("acme/app:v")));
    }

    #[tokio::test]
    async fn invalid_filter_is_validation_error() {
        let (_server, admin) = admin_with(vec![]).await;
        let err = admin.remove_by_filter("(", false).await.unwrap_err();
        assert!(matches!(err, crate::ProtocolError::Core(Error::Validation(_))));
    }

    #[tokio::test]
    async fn remove_by_id_prefix_removes_every_tag() {
        let (server, admin) = admin_with(vec![repo(
            "acme/app",
            vec![package("aaaaaaaaaaaaaaaa", &["v1", "v2"])],
        )])
        .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/package/acme/app/tag/v2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let removed = admin
            .remove_by_name_or_id(&["aaaaaa".to_string()])
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
    }

    #[tokio::test]
    async fn remove_by_name_deletes_that_tag() {
        let (server, admin) = admin_with(vec![]).await;
        let remote = repo("acme/app", vec![package("aaaaaaaaaaaaaaaa", &["v1"])]);
        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(json::to_json(&remote).unwrap()))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/package/acme/app/tag/v1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let removed = admin
            .remove_by_name_or_id(&["acme/app:v1".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, vec![format!("{}/acme/app:v1", admin.domain())]);
    }

    #[tokio::test]
    async fn remove_unknown_reference_is_not_found() {
        let (_server, admin) = admin_with(vec![]).await;
        let err = admin
            .remove_by_name_or_id(&["ffff".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ProtocolError::Core(Error::NotFound(_))));
    }
}
