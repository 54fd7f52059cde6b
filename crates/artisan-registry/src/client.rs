//! Push and pull between the local index and a remote registry.

use crate::api::{RegistryApi, UploadStatus};
use crate::config::ClientConfig;
use crate::error::{ProtocolError, Result};
use crate::index::{IndexStore, JsonFileStore, LocalIndex};
use crate::retry::{Attempt, RetryError, RetryPolicy, retry};
use artisan_core::{
    Credentials, DigestVerifier, Error, Package, PackageName, Seal, SealVerifier, json,
    validate_file_ref,
};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What a push did on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote already had the package under this tag.
    NothingToPush,
    /// The remote had the content; only the tag was added.
    TagPushed,
    /// Content, seal and metadata were uploaded.
    Uploaded,
}

/// What a pull did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The name already resolved to the remote package.
    AlreadyPresent,
    /// The content was already stored locally; only the tag was added.
    Tagged,
    /// Content and seal were downloaded, verified and added.
    Downloaded,
}

/// Run `op` under `policy`, translating retry failures into protocol errors.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry(policy, cancel, || {
        let call = op();
        async move {
            call.await
                .map_err(|e| Attempt::classify(e, ProtocolError::is_retryable))
        }
    })
    .await
    .map_err(|e| match e {
        RetryError::Stopped(e) => e,
        RetryError::Exhausted { attempts, last } => ProtocolError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        },
        RetryError::Cancelled => ProtocolError::Cancelled,
    })
}

/// Remove `tag` from any remote package other than `keep_id`.
pub(crate) async fn strip_remote_tag(
    api: &RegistryApi,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    name: &PackageName,
    keep_id: &str,
) -> Result<()> {
    let (group, repo) = (name.group(), name.name());
    let remote = with_retry(policy, cancel, || api.get_repository_info(group, repo)).await?;
    let Some(holder) = remote
        .packages
        .iter()
        .find(|p| p.id != keep_id && p.has_tag(name.tag()))
    else {
        return Ok(());
    };

    let mut holder = holder.clone();
    holder.remove_tag(name.tag());
    debug!(tag = name.tag(), id = %holder.short_id(), "releasing tag on the remote");
    with_retry(policy, cancel, || api.put_package_info(group, repo, &holder)).await
}

/// Moves packages between a [`LocalIndex`] and remote registries.
#[derive(Debug)]
pub struct RegistryClient<S: IndexStore = JsonFileStore> {
    index: LocalIndex<S>,
    config: ClientConfig,
    verifier: Arc<dyn SealVerifier>,
    cancel: CancellationToken,
}

impl<S: IndexStore> RegistryClient<S> {
    /// Client over `index`, verifying downloads with [`DigestVerifier`].
    #[must_use]
    pub fn new(index: LocalIndex<S>, config: ClientConfig) -> Self {
        Self {
            index,
            config,
            verifier: Arc::new(DigestVerifier),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the seal verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn SealVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Token that aborts in-flight retries when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The local index.
    #[must_use]
    pub const fn index(&self) -> &LocalIndex<S> {
        &self.index
    }

    /// Give the index back.
    #[must_use]
    pub fn into_index(self) -> LocalIndex<S> {
        self.index
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.attempts, self.config.initial_backoff)
    }

    fn api(&self, name: &PackageName, credentials: &Credentials) -> Result<RegistryApi> {
        RegistryApi::new(name.domain(), credentials.clone(), &self.config)
    }

    /// Push the package `name` resolves to.
    ///
    /// # Errors
    /// Returns error if the package is not in the local index, the remote
    /// rejects the call, or every retry fails.
    pub async fn push(&self, name: &PackageName, credentials: &Credentials) -> Result<PushOutcome> {
        let package = self
            .index
            .find(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("package {name} in the local registry")))?;
        let api = self.api(name, credentials)?;
        let (policy, cancel) = (self.policy(), &self.cancel);
        let (group, repo, tag) = (name.group(), name.name(), name.tag());

        let remote = with_retry(policy, cancel, || {
            api.get_package_info(group, repo, &package.id)
        })
        .await?;

        let outcome = match remote {
            Some(remote) if remote.has_tag(tag) => PushOutcome::NothingToPush,
            Some(mut remote) => {
                strip_remote_tag(&api, policy, cancel, name, &package.id).await?;
                remote.add_tag(tag);
                with_retry(policy, cancel, || api.put_package_info(group, repo, &remote)).await?;
                PushOutcome::TagPushed
            }
            None => {
                strip_remote_tag(&api, policy, cancel, name, &package.id).await?;
                let content = Bytes::from(self.index.read_content(&package)?);
                let seal = Bytes::from(json::to_json(&self.index.read_seal(&package)?)?);
                let mut upload = package.clone();
                upload.tags = vec![tag.to_string()];
                match with_retry(policy, cancel, || {
                    api.upload(group, repo, tag, &upload, content.clone(), seal.clone())
                })
                .await?
                {
                    UploadStatus::Created => PushOutcome::Uploaded,
                    UploadStatus::AlreadyPresent => PushOutcome::NothingToPush,
                }
            }
        };

        info!(name = %name, id = %package.short_id(), outcome = ?outcome, "push finished");
        Ok(outcome)
    }

    /// Pull `name` into the local index.
    ///
    /// # Errors
    /// Returns error if the tag does not exist remotely, the download fails
    /// verification, or every retry fails.
    pub async fn pull(&mut self, name: &PackageName, credentials: &Credentials) -> Result<PullOutcome> {
        let api = self.api(name, credentials)?;
        let (policy, cancel) = (self.policy(), self.cancel.clone());
        let (group, repo) = (name.group(), name.name());

        let remote_repo = with_retry(policy, &cancel, || api.get_repository_info(group, repo)).await?;
        let remote = remote_repo
            .find_by_tag(name.tag())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("package {name} on the remote registry")))?;

        if self.index.find(name).is_some_and(|p| p.id == remote.id) {
            info!(name = %name, "package already present");
            return Ok(PullOutcome::AlreadyPresent);
        }

        if let Some(local) = self.index.find_by_id(&remote.id).cloned() {
            self.index.link(&local, name)?;
            info!(name = %name, id = %local.short_id(), "content already stored, tag added");
            return Ok(PullOutcome::Tagged);
        }

        let package = self.download(&api, policy, &cancel, name, &remote).await?;
        info!(name = %name, id = %package.short_id(), size = package.size, "package downloaded");
        Ok(PullOutcome::Downloaded)
    }

    async fn download(
        &mut self,
        api: &RegistryApi,
        policy: RetryPolicy,
        cancel: &CancellationToken,
        name: &PackageName,
        remote: &Package,
    ) -> Result<Package> {
        validate_file_ref(&remote.file_ref)?;
        let (group, repo) = (name.group(), name.name());
        let seal_file = format!("{}.json", remote.file_ref);
        let content_file = format!("{}.zip", remote.file_ref);

        let seal_bytes = with_retry(policy, cancel, || api.download(group, repo, &seal_file)).await?;
        let seal = Seal::from_slice(&seal_bytes)?;
        let content = with_retry(policy, cancel, || api.download(group, repo, &content_file)).await?;

        self.verifier.verify(&seal, &content)?;
        let id = seal.package_id()?;
        if id != remote.id {
            return Err(Error::Integrity(format!(
                "seal of {name} hashes to {id}, the registry lists {}",
                remote.id
            ))
            .into());
        }

        let tmp = self.index.home().tmp_dir();
        std::fs::create_dir_all(&tmp).map_err(|e| Error::io(&tmp, e))?;
        let scratch = tempfile::tempdir_in(&tmp).map_err(|e| Error::io(&tmp, e))?;
        let path = scratch.path().join(&content_file);
        std::fs::write(&path, &content).map_err(|e| Error::io(&path, e))?;

        Ok(self.index.add(&path, name, &seal)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegistryHome, TlsMode};
    use crate::index::tests::sealed_archive;
    use artisan_core::Repository;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _home: tempfile::TempDir,
        src: tempfile::TempDir,
        server: MockServer,
        client: RegistryClient,
    }

    async fn fixture() -> Fixture {
        let home = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let server = MockServer::start().await;
        let index = LocalIndex::open(RegistryHome::new(home.path())).unwrap();
        let config = ClientConfig {
            tls: TlsMode::Disable,
            initial_backoff: Duration::from_millis(1),
            ..ClientConfig::default()
        };
        Fixture {
            _home: home,
            src,
            server,
            client: RegistryClient::new(index, config),
        }
    }

    impl Fixture {
        fn name(&self, tag: &str) -> PackageName {
            let domain = self.server.uri().trim_start_matches("http://").to_string();
            PackageName::new(domain, "acme", "app", tag).unwrap()
        }

        fn add(&mut self, file_ref: &str, body: &[u8], tag: &str) -> Package {
            let (zip, seal) = sealed_archive(self.src.path(), file_ref, body);
            let name = self.name(tag);
            self.client.index.add(&zip, &name, &seal).unwrap()
        }
    }

    fn creds() -> Credentials {
        Credentials::new("admin", "admin")
    }

    fn repo_body(packages: Vec<Package>) -> String {
        let mut repo = Repository::new("acme/app");
        repo.packages = packages;
        json::to_json(&repo).unwrap()
    }

    #[tokio::test]
    async fn push_is_noop_when_remote_has_id_and_tag() {
        let mut fx = fixture().await;
        let pkg = fx.add("ref-a", b"alpha", "v1");
        Mock::given(method("GET"))
            .and(path(format!("/package/info/acme/app/id/{}", pkg.id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(json::to_json(&pkg).unwrap()))
            .mount(&fx.server)
            .await;

        let out = fx.client.push(&fx.name("v1"), &creds()).await.unwrap();
        assert_eq!(out, PushOutcome::NothingToPush);
    }

    #[tokio::test]
    async fn push_adds_missing_tag_with_metadata_update() {
        let mut fx = fixture().await;
        let pkg = fx.add("ref-a", b"alpha", "v2");
        let mut remote = pkg.clone();
        remote.tags = vec!["v1".into()];
        let info_path = format!("/package/info/acme/app/id/{}", pkg.id);

        Mock::given(method("GET"))
            .and(path(info_path.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_string(json::to_json(&remote).unwrap()))
            .mount(&fx.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repo_body(vec![remote.clone()])))
            .mount(&fx.server)
            .await;
        Mock::given(method("PUT"))
            .and(path(info_path))
            .and(body_string_contains("\"v2\""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&fx.server)
            .await;

        let out = fx.client.push(&fx.name("v2"), &creds()).await.unwrap();
        assert_eq!(out, PushOutcome::TagPushed);
    }

    #[tokio::test]
    async fn push_uploads_and_strips_tag_from_other_remote_package() {
        let mut fx = fixture().await;
        let pkg = fx.add("ref-a", b"alpha", "latest");
        let mut other = pkg.clone();
        other.id = "sha256:00000000000000000000".into();
        other.file_ref = "ref-old".into();

        Mock::given(method("GET"))
            .and(path(format!("/package/info/acme/app/id/{}", pkg.id)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&fx.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repo_body(vec![other.clone()])))
            .mount(&fx.server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/package/info/acme/app/id/{}", other.id)))
            .and(body_string_contains("\"tags\":[]"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&fx.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/package/acme/app/tag/latest"))
            .and(body_string_contains("package-meta"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&fx.server)
            .await;

        let out = fx.client.push(&fx.name("latest"), &creds()).await.unwrap();
        assert_eq!(out, PushOutcome::Uploaded);
    }

    #[tokio::test]
    async fn push_surfaces_lock_and_leaves_index_alone() {
        let mut fx = fixture().await;
        let pkg = fx.add("ref-a", b"alpha", "v1");
        Mock::given(method("GET"))
            .and(path(format!("/package/info/acme/app/id/{}", pkg.id)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&fx.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repo_body(vec![])))
            .mount(&fx.server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(423))
            .expect(1)
            .mount(&fx.server)
            .await;

        let before = fx.client.index().repositories().to_vec();
        let err = fx.client.push(&fx.name("v1"), &creds()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Locked { .. }));
        assert_eq!(fx.client.index().repositories(), before.as_slice());
    }

    #[tokio::test]
    async fn push_unknown_package_is_not_found() {
        let fx = fixture().await;
        let err = fx.client.push(&fx.name("v1"), &creds()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Core(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhausted() {
        let mut fx = fixture().await;
        let pkg = fx.add("ref-a", b"alpha", "v1");
        Mock::given(method("GET"))
            .and(path(format!("/package/info/acme/app/id/{}", pkg.id)))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&fx.server)
            .await;

        let err = fx.client.push(&fx.name("v1"), &creds()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn pull_downloads_and_verifies() {
        let mut fx = fixture().await;
        let (zip, seal) = sealed_archive(fx.src.path(), "ref-r", b"remote body");
        let id = seal.package_id().unwrap();
        let remote = Package {
            id: id.clone(),
            package_type: "content/zip".into(),
            file_ref: "ref-r".into(),
            tags: vec!["v1".into()],
            size: 11,
            created: chrono::Utc::now(),
        };
        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repo_body(vec![remote])))
            .mount(&fx.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/acme/app/ref-r.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(json::to_json(&seal).unwrap()))
            .mount(&fx.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/acme/app/ref-r.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(std::fs::read(zip).unwrap()))
            .mount(&fx.server)
            .await;

        let name = fx.name("v1");
        let out = fx.client.pull(&name, &creds()).await.unwrap();
        assert_eq!(out, PullOutcome::Downloaded);
        assert_eq!(fx.client.index().find(&name).unwrap().id, id);

        let again = fx.client.pull(&name, &creds()).await.unwrap();
        assert_eq!(again, PullOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn pull_rejects_file_ref_outside_home() {
        let mut fx = fixture().await;
        let remote = Package {
            id: "sha256:0123456789abcdef".into(),
            package_type: "content/zip".into(),
            file_ref: "../../escaped".into(),
            tags: vec!["v1".into()],
            size: 4,
            created: chrono::Utc::now(),
        };
        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repo_body(vec![remote])))
            .mount(&fx.server)
            .await;

        let name = fx.name("v1");
        let err = fx.client.pull(&name, &creds()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Core(Error::Validation(_))));
        assert!(fx.client.index().find(&name).is_none());
        let requests = fx.server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| !r.url.path().starts_with("/file/")));
    }

    #[tokio::test]
    async fn pull_rejects_tampered_content() {
        let mut fx = fixture().await;
        let (_zip, seal) = sealed_archive(fx.src.path(), "ref-r", b"remote body");
        let remote = Package {
            id: seal.package_id().unwrap(),
            package_type: "content/zip".into(),
            file_ref: "ref-r".into(),
            tags: vec!["v1".into()],
            size: 11,
            created: chrono::Utc::now(),
        };
        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repo_body(vec![remote])))
            .mount(&fx.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/acme/app/ref-r.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(json::to_json(&seal).unwrap()))
            .mount(&fx.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/acme/app/ref-r.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"evil body".to_vec()))
            .mount(&fx.server)
            .await;

        let name = fx.name("v1");
        let err = fx.client.pull(&name, &creds()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Core(Error::Integrity(_))));
        assert!(fx.client.index().find(&name).is_none());
    }

    #[tokio::test]
    async fn pull_tags_content_already_stored_in_another_repository() {
        let mut fx = fixture().await;
        let (zip, seal) = sealed_archive(fx.src.path(), "ref-a", b"alpha");
        let domain = fx.server.uri().trim_start_matches("http://").to_string();
        let other = PackageName::new(domain, "team", "copy", "v1").unwrap();
        let local = fx.client.index.add(&zip, &other, &seal).unwrap();

        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repo_body(vec![local.clone()])))
            .mount(&fx.server)
            .await;

        let name = fx.name("v1");
        let out = fx.client.pull(&name, &creds()).await.unwrap();
        assert_eq!(out, PullOutcome::Tagged);
        assert_eq!(fx.client.index().find(&name).unwrap().id, local.id);
    }

    #[tokio::test]
    async fn pull_unknown_tag_is_not_found() {
        let mut fx = fixture().await;
        Mock::given(method("GET"))
            .and(path("/repository/acme/app"))
            .respond_with(ResponseTemplate::new(200).set_body_string(repo_body(vec![])))
            .mount(&fx.server)
            .await;
        let err = fx.client.pull(&fx.name("v9"), &creds()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Core(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn cancelled_client_stops_before_calling() {
        let mut fx = fixture().await;
        fx.add("ref-a", b"alpha", "v1");
        fx.client.cancellation_token().cancel();
        let err = fx.client.push(&fx.name("v1"), &creds()).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Cancelled));
    }
}
