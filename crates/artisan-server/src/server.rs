//! The HTTP registry: router, middleware and handlers.
//!
//! Handlers share no in-memory registry state. Every write re-reads the
//! repository metadata from the backend while holding the repository's
//! [`RepositoryLock`], and the guard is dropped on every exit path.

use crate::backend::{FsBackend, Nexus3Backend, StorageBackend, repository_path};
use crate::config::{BackendKind, ServerConfig};
use crate::error::ApiError;
use crate::lock::RepositoryLock;
use crate::negotiate::{Format, respond, respond_list, respond_with};
use crate::webhook::{
    WebhookAction, WebhookDispatcher, WebhookEvent, WebhookRegistry, WebhookRequest,
};
use artisan_core::name::validate_tag;
use artisan_core::{
    Credentials, DEFAULT_DOMAIN, DEFAULT_TAG, DigestVerifier, Error, Package, PackageName,
    RepositoryDiff, Seal, SealVerifier, json, validate_file_ref,
};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    backend: Arc<dyn StorageBackend>,
    locks: RepositoryLock,
    webhooks: WebhookDispatcher,
    credentials: Arc<Credentials>,
    upload_limit: usize,
}

impl AppState {
    /// State over an explicit backend.
    #[must_use]
    pub fn new(config: &ServerConfig, backend: Arc<dyn StorageBackend>) -> Self {
        let registry = Arc::new(WebhookRegistry::new(config.hooks_path()));
        Self {
            backend,
            locks: RepositoryLock::new(config.locks_dir(), config.lock_ttl)
                .with_wait(config.lock_wait),
            webhooks: WebhookDispatcher::new(registry),
            credentials: Arc::new(config.credentials.clone()),
            upload_limit: config.upload_limit,
        }
    }

    /// State with the backend selected by `config`.
    ///
    /// # Errors
    /// Returns error if the backend client cannot be built.
    pub fn from_config(config: &ServerConfig) -> artisan_core::Result<Self> {
        let backend: Arc<dyn StorageBackend> = match &config.backend {
            BackendKind::Filesystem => Arc::new(FsBackend::new(config.data_dir())),
            BackendKind::Nexus {
                domain,
                credentials,
            } => Arc::new(Nexus3Backend::new(domain.clone(), credentials.clone())?),
        };
        Ok(Self::new(config, backend))
    }

    /// The storage backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The repository locks.
    #[must_use]
    pub const fn locks(&self) -> &RepositoryLock {
        &self.locks
    }

    fn publish(&self, action: WebhookAction, group: &str, name: &str, tag: &str, id: &str) {
        drop(
            self.webhooks
                .publish(WebhookEvent::new(action, group, name, tag, id)),
        );
    }

    fn publish_diff(&self, group: &str, name: &str, diff: &RepositoryDiff) {
        for package in &diff.added {
            for tag in &package.tags {
                self.publish(WebhookAction::Tagged, group, name, tag, &package.id);
            }
        }
        for package in &diff.removed {
            self.publish(WebhookAction::Removed, group, name, "", &package.id);
        }
        for updated in &diff.updated {
            for tag in &updated.tags_added {
                self.publish(WebhookAction::Tagged, group, name, tag, &updated.package.id);
            }
            for tag in &updated.tags_removed {
                self.publish(WebhookAction::Untagged, group, name, tag, &updated.package.id);
            }
        }
    }
}

/// Build the router with authentication and request logging.
pub fn router(state: AppState) -> Router {
    let limit = state.upload_limit;
    Router::new()
        .route("/", get(liveness))
        .route(
            "/package/:group/:name/tag/:tag",
            post(upload_package).delete(delete_tag),
        )
        .route(
            "/package/info/:group/:name/id/:id",
            get(get_package_info)
                .put(put_package_info)
                .delete(delete_package_info),
        )
        .route("/package/manifest/:group/:name/:tag", get(get_manifest))
        .route("/repository", get(get_all_repositories))
        .route("/repository/:group/:name", get(get_repository))
        .route("/file/:group/:name/:filename", get(download_file))
        .route("/webhook/:group/:name", post(add_webhook).get(list_webhooks))
        .route("/webhook/:group/:name/:id", delete(remove_webhook))
        .layer(DefaultBodyLimit::max(limit))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(value) = request.headers().get(header::AUTHORIZATION) else {
        return Err(ApiError::Unauthorized);
    };
    let presented = value
        .to_str()
        .ok()
        .and_then(Credentials::from_basic_header)
        .ok_or(ApiError::Unauthorized)?;
    if presented != *state.credentials {
        warn!(user = %presented.user, "rejected credentials");
        return Err(ApiError::Forbidden);
    }
    Ok(next.run(request).await)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

fn validate_repository(group: &str, name: &str) -> Result<(), ApiError> {
    validate_reference(group, name, DEFAULT_TAG)
}

fn validate_reference(group: &str, name: &str, tag: &str) -> Result<(), ApiError> {
    PackageName::new(DEFAULT_DOMAIN, group, name, tag)?;
    Ok(())
}

async fn liveness() -> &'static str {
    "OK"
}

struct UploadForm {
    package: Package,
    content: Bytes,
    seal: Bytes,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let (mut meta, mut content, mut seal) = (None, None, None);
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "package-meta" => meta = Some(field.bytes().await?),
            "package-file" => content = Some(field.bytes().await?),
            "package-seal" => seal = Some(field.bytes().await?),
            other => debug!(field = other, "ignoring multipart field"),
        }
    }

    let missing = |part: &str| ApiError::BadRequest(format!("multipart part '{part}' is missing"));
    let meta = meta.ok_or_else(|| missing("package-meta"))?;
    let decoded = STANDARD
        .decode(meta.trim_ascii())
        .map_err(|e| ApiError::BadRequest(format!("package-meta is not base64: {e}")))?;
    Ok(UploadForm {
        package: json::from_json_slice(&decoded)?,
        content: content.ok_or_else(|| missing("package-file"))?,
        seal: seal.ok_or_else(|| missing("package-seal"))?,
    })
}

/// The seal must describe the metadata's file and content, and hash to its id.
fn verify_upload(form: &UploadForm) -> Result<(), ApiError> {
    validate_file_ref(&form.package.file_ref)
        .map_err(|e| ApiError::BadRequest(format!("package-info: {e}")))?;
    let seal = Seal::from_slice(&form.seal)
        .map_err(|e| ApiError::BadRequest(format!("package-seal: {e}")))?;
    if seal.manifest.reference != form.package.file_ref {
        return Err(ApiError::BadRequest(format!(
            "seal reference '{}' does not match file reference '{}'",
            seal.manifest.reference, form.package.file_ref
        )));
    }
    DigestVerifier.verify(&seal, &form.content)?;
    let id = seal.package_id()?;
    if id != form.package.id {
        return Err(ApiError::BadRequest(format!(
            "package id {} does not match its seal ({id})",
            form.package.id
        )));
    }
    Ok(())
}

async fn upload_package(
    State(state): State<AppState>,
    Path((group, name, tag)): Path<(String, String, String)>,
    multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    validate_reference(&group, &name, &tag)?;
    let form = read_upload(multipart).await?;
    verify_upload(&form)?;

    let repo_path = repository_path(&group, &name);
    let id = form.package.id.clone();
    let current = state.backend.get_repository_info(&group, &name).await?;
    if current.find_by_id(&id).is_some_and(|p| p.has_tag(&tag)) {
        debug!(repository = %repo_path, %tag, "package already tagged");
        return Ok(StatusCode::OK);
    }

    let guard = state.locks.acquire(&repo_path).await?;
    let mut repository = state.backend.get_repository_info(&group, &name).await?;
    if repository.find_by_id(&id).is_some_and(|p| p.has_tag(&tag)) {
        return Ok(StatusCode::OK);
    }

    let previous = repository.untag(&tag);
    let action = if let Some(existing) = repository.find_by_id_mut(&id) {
        existing.add_tag(&tag);
        state
            .backend
            .put_repository_info(&group, &name, &repository)
            .await?;
        WebhookAction::Tagged
    } else {
        let mut package = form.package;
        package.tags = vec![tag.clone()];
        package.size = form.content.len() as u64;
        let file_ref = package.file_ref.clone();
        repository.packages.push(package);
        state
            .backend
            .upload(&group, &name, &file_ref, form.content, form.seal, &repository)
            .await?;
        WebhookAction::Upload
    };
    if let Err(e) = guard.release() {
        warn!(repository = %repo_path, error = %e, "failed to release lock");
    }
    info!(repository = %repo_path, %tag, %action, backend = state.backend.kind(), "package published");

    if let Some(previous) = previous {
        state.publish(WebhookAction::Untagged, &group, &name, &tag, &previous.id);
    }
    state.publish(action, &group, &name, &tag, &id);
    Ok(StatusCode::CREATED)
}

async fn delete_tag(
    State(state): State<AppState>,
    Path((group, name, tag)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    validate_reference(&group, &name, &tag)?;
    let repo_path = repository_path(&group, &name);
    let not_found = || ApiError::NotFound(format!("tag {tag} in {repo_path}"));

    let current = state.backend.get_repository_info(&group, &name).await?;
    if current.find_by_tag(&tag).is_none() {
        return Err(not_found());
    }

    let guard = state.locks.acquire(&repo_path).await?;
    let mut repository = state.backend.get_repository_info(&group, &name).await?;
    let holder = repository.untag(&tag).ok_or_else(not_found)?;
    let action = if holder.is_dangling() {
        state.backend.delete_package(&group, &name, &holder).await?;
        WebhookAction::Removed
    } else {
        state
            .backend
            .put_repository_info(&group, &name, &repository)
            .await?;
        WebhookAction::Untagged
    };
    if let Err(e) = guard.release() {
        warn!(repository = %repo_path, error = %e, "failed to release lock");
    }
    info!(repository = %repo_path, %tag, %action, "tag deleted");

    state.publish(action, &group, &name, &tag, &holder.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_package_info(
    State(state): State<AppState>,
    Path((group, name, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_repository(&group, &name)?;
    let repository = state.backend.get_repository_info(&group, &name).await?;
    let package = repository.find_by_id(&id).ok_or_else(|| {
        ApiError::NotFound(format!("package {id} in {}", repository_path(&group, &name)))
    })?;
    respond(Format::from_headers(&headers), package, "package")
}

async fn put_package_info(
    State(state): State<AppState>,
    Path((group, name, id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    validate_repository(&group, &name)?;
    let package: Package = json::from_json_slice(&body)?;
    if package.id != id {
        return Err(ApiError::BadRequest(format!(
            "payload id {} does not match {id}",
            package.id
        )));
    }
    for tag in &package.tags {
        validate_tag(tag)?;
    }

    let repo_path = repository_path(&group, &name);
    let guard = state.locks.acquire(&repo_path).await?;
    let before = state.backend.get_repository_info(&group, &name).await?;
    state
        .backend
        .upsert_package_info(&group, &name, &package)
        .await?;
    let after = state.backend.get_repository_info(&group, &name).await?;
    drop(guard);

    debug!(repository = %repo_path, id = %package.short_id(), "package info updated");
    state.publish_diff(&group, &name, &RepositoryDiff::between(&after, &before));
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_package_info(
    State(state): State<AppState>,
    Path((group, name, id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    validate_repository(&group, &name)?;
    let repo_path = repository_path(&group, &name);
    let guard = state.locks.acquire(&repo_path).await?;
    let before = state.backend.get_repository_info(&group, &name).await?;
    let package = before
        .find_by_id(&id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("package {id} in {repo_path}")))?;
    state
        .backend
        .delete_package_info(&group, &name, &id)
        .await?;
    drop(guard);

    debug!(repository = %repo_path, id = %package.short_id(), "package info deleted");
    state.publish(WebhookAction::Removed, &group, &name, "", &package.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_manifest(
    State(state): State<AppState>,
    Path((group, name, tag)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_reference(&group, &name, &tag)?;
    let manifest = state
        .backend
        .get_package_manifest(&group, &name, &tag)
        .await?;
    respond(Format::from_headers(&headers), &manifest, "manifest")
}

async fn get_repository(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_repository(&group, &name)?;
    let repository = state.backend.get_repository_info(&group, &name).await?;
    respond(Format::from_headers(&headers), &repository, "repository")
}

async fn get_all_repositories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let repositories = state.backend.get_all_repository_info().await?;
    respond_list(
        Format::from_headers(&headers),
        &repositories,
        "repositories",
        "repository",
    )
}

async fn download_file(
    State(state): State<AppState>,
    Path((group, name, filename)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    validate_repository(&group, &name)?;
    let content = state.backend.download(&group, &name, &filename).await?;
    let mut response = content.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok(response)
}

#[derive(Serialize)]
struct WebhookCreated {
    id: String,
}

async fn add_webhook(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    validate_repository(&group, &name)?;
    let request: WebhookRequest = json::from_json_slice(&body)?;
    let id = state.webhooks.registry().add(&group, &name, request).await?;
    respond_with(
        Format::from_headers(&headers),
        StatusCode::CREATED,
        &WebhookCreated { id },
        "webhook",
    )
}

async fn list_webhooks(
    State(state): State<AppState>,
    Path((group, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    validate_repository(&group, &name)?;
    let hooks: Vec<_> = state
        .webhooks
        .registry()
        .list(&group, &name)
        .await?
        .iter()
        .map(|h| h.redacted())
        .collect();
    respond_list(Format::from_headers(&headers), &hooks, "webhooks", "webhook")
}

async fn remove_webhook(
    State(state): State<AppState>,
    Path((group, name, id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    validate_repository(&group, &name)?;
    if state.webhooks.registry().remove(&group, &name, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "webhook {id} for {}",
            repository_path(&group, &name)
        )))
    }
}

/// A bound registry server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    router: Router,
}

impl Server {
    /// Bind `0.0.0.0:<port>` and build the backend from `config`. Port 0
    /// picks a free port.
    ///
    /// # Errors
    /// Returns error if the port cannot be bound or the backend cannot be built.
    pub async fn bind(config: &ServerConfig) -> artisan_core::Result<Self> {
        Self::bind_with(config, AppState::from_config(config)?).await
    }

    /// Bind with prepared state.
    ///
    /// # Errors
    /// Returns error if the port cannot be bound.
    pub async fn bind_with(config: &ServerConfig, state: AppState) -> artisan_core::Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("cannot bind {addr}: {e}")))?;
        if config.metrics {
            info!("metrics requested; this build exposes none");
        }
        if config.swagger {
            info!("API docs requested; this build serves none");
        }
        info!(
            addr = %addr,
            backend = state.backend.kind(),
            upload_limit = config.upload_limit,
            "registry server bound"
        );
        Ok(Self {
            listener,
            router: router(state),
        })
    }

    /// Address actually bound.
    ///
    /// # Errors
    /// Returns error if the socket has no local address.
    pub fn local_addr(&self) -> artisan_core::Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("no local address: {e}")))
    }

    /// Serve until `shutdown` completes, then finish in-flight requests.
    ///
    /// # Errors
    /// Returns error if the accept loop fails.
    pub async fn run<F>(self, shutdown: F) -> artisan_core::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Transport(format!("server error: {e}")))?;
        info!("registry server stopped");
        Ok(())
    }
}

/// Completes on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisan_core::Manifest;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Running {
        _root: tempfile::TempDir,
        base: String,
        state: AppState,
        http: reqwest::Client,
    }

    async fn start() -> Running {
        let root = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            port: 0,
            root: root.path().to_path_buf(),
            credentials: Credentials::new("admin", "secret"),
            lock_ttl: Duration::from_secs(60),
            lock_wait: Duration::from_millis(100),
            ..ServerConfig::default()
        };
        let state = AppState::new(&config, Arc::new(FsBackend::new(config.data_dir())));
        let server = Server::bind_with(&config, state.clone()).await.unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(server.run(std::future::pending()));
        Running {
            _root: root,
            base: format!("http://127.0.0.1:{port}"),
            state,
            http: reqwest::Client::new(),
        }
    }

    impl Running {
        fn get(&self, path: &str) -> reqwest::RequestBuilder {
            self.http
                .get(format!("{}{path}", self.base))
                .basic_auth("admin", Some("secret"))
        }

        fn delete(&self, path: &str) -> reqwest::RequestBuilder {
            self.http
                .delete(format!("{}{path}", self.base))
                .basic_auth("admin", Some("secret"))
        }

        async fn upload(&self, tag: &str, body: &[u8], file_ref: &str) -> (reqwest::StatusCode, Package) {
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
            let form = reqwest::multipart::Form::new()
                .text("package-meta", STANDARD.encode(json::to_json(&package).unwrap()))
                .part(
                    "package-file",
                    reqwest::multipart::Part::bytes(body.to_vec()).file_name(format!("{file_ref}.zip")),
                )
                .part(
                    "package-seal",
                    reqwest::multipart::Part::bytes(json::to_json(&seal).unwrap().into_bytes())
                        .file_name(format!("{file_ref}.json")),
                );
            let status = self
                .http
                .post(format!("{}/package/acme/app/tag/{tag}", self.base))
                .basic_auth("admin", Some("secret"))
                .multipart(form)
                .send()
                .await
                .unwrap()
                .status();
            (status, package)
        }
    }

    #[tokio::test]
    async fn liveness_requires_auth() {
        let server = start().await;
        let anonymous = server
            .http
            .get(format!("{}/", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(anonymous.status(), 401);
        assert_eq!(
            anonymous.headers()["www-authenticate"],
            crate::error::AUTH_REALM
        );

        let wrong = server
            .http
            .get(format!("{}/", server.base))
            .basic_auth("admin", Some("nope"))
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 403);

        let ok = server.get("/").send().await.unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn upload_is_idempotent_and_moves_tags() {
        let server = start().await;
        let (status, first) = server.upload("latest", b"one", "ref-1").await;
        assert_eq!(status, 201);
        let (status, _) = server.upload("latest", b"one", "ref-1").await;
        assert_eq!(status, 200);

        let (status, second) = server.upload("latest", b"two", "ref-2").await;
        assert_eq!(status, 201);

        let repo = server
            .state
            .backend()
            .get_repository_info("acme", "app")
            .await
            .unwrap();
        assert_eq!(repo.find_by_tag("latest").unwrap().id, second.id);
        assert!(repo.find_by_id(&first.id).unwrap().is_dangling());
        assert!(!server.state.locks().is_locked("acme/app"));
    }

    #[tokio::test]
    async fn upload_rejects_tampered_content() {
        let server = start().await;
        let (_, package) = server.upload("v1", b"one", "ref-1").await;

        let manifest = Manifest {
            package_type: "content/zip".into(),
            reference: "ref-1".into(),
            size: 3,
            time: Utc::now(),
            labels: BTreeMap::new(),
        };
        let seal = Seal::compute(manifest, b"one").unwrap();
        let form = reqwest::multipart::Form::new()
            .text("package-meta", STANDARD.encode(json::to_json(&package).unwrap()))
            .part("package-file", reqwest::multipart::Part::bytes(b"evil".to_vec()))
            .part(
                "package-seal",
                reqwest::multipart::Part::bytes(json::to_json(&seal).unwrap().into_bytes()),
            );
        let response = server
            .http
            .post(format!("{}/package/acme/app/tag/v2", server.base))
            .basic_auth("admin", Some("secret"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn upload_rejects_file_ref_outside_repository() {
        let server = start().await;
        let (status, _) = server.upload("v1", b"one", "../../../escaped").await;
        assert_eq!(status, 400);

        let root = server._root.path();
        assert!(!root.join("escaped.zip").exists());
        assert!(!root.join("data/escaped.zip").exists());
        let repo = server
            .state
            .backend()
            .get_repository_info("acme", "app")
            .await
            .unwrap();
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn upload_while_locked_is_423() {
        let server = start().await;
        let _held = server.state.locks().try_acquire("acme/app").unwrap();
        let (status, _) = server.upload("v1", b"one", "ref-1").await;
        assert_eq!(status, 423);
        let repo = server
            .state
            .backend()
            .get_repository_info("acme", "app")
            .await
            .unwrap();
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn delete_tag_keeps_content_until_last_tag() {
        let server = start().await;
        let (_, package) = server.upload("v1", b"one", "ref-1").await;
        let mut tagged = package.clone();
        tagged.tags = vec!["v1".into(), "stable".into()];
        let put = server
            .http
            .put(format!("{}/package/info/acme/app/id/{}", server.base, package.id))
            .basic_auth("admin", Some("secret"))
            .body(json::to_json(&tagged).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(put.status(), 204);

        let response = server.delete("/package/acme/app/tag/v1").send().await.unwrap();
        assert_eq!(response.status(), 204);
        let file = server.get("/file/acme/app/ref-1.zip").send().await.unwrap();
        assert_eq!(file.status(), 200);

        let response = server.delete("/package/acme/app/tag/stable").send().await.unwrap();
        assert_eq!(response.status(), 204);
        let file = server.get("/file/acme/app/ref-1.zip").send().await.unwrap();
        assert_eq!(file.status(), 404);

        let missing = server.delete("/package/acme/app/tag/stable").send().await.unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn put_info_rejects_mismatched_id() {
        let server = start().await;
        let (_, package) = server.upload("v1", b"one", "ref-1").await;
        let response = server
            .http
            .put(format!("{}/package/info/acme/app/id/sha256:other", server.base))
            .basic_auth("admin", Some("secret"))
            .body(json::to_json(&package).unwrap())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let info = server
            .get(&format!("/package/info/acme/app/id/{}", package.id))
            .send()
            .await
            .unwrap();
        assert_eq!(info.status(), 200);
        let missing = server
            .get("/package/info/acme/app/id/sha256:none")
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test]
    async fn responses_follow_accept_header() {
        let server = start().await;
        server.upload("v1", b"one", "ref-1").await;

        let yaml = server
            .get("/repository/acme/app")
            .header("accept", "application/yaml")
            .send()
            .await
            .unwrap();
        assert_eq!(yaml.headers()["content-type"], "application/yaml");
        assert!(yaml.text().await.unwrap().contains("repository: acme/app"));

        let xml = server
            .get("/repository")
            .header("accept", "application/xml")
            .send()
            .await
            .unwrap();
        assert!(xml.text().await.unwrap().starts_with("<repositories>"));

        let manifest = server.get("/package/manifest/acme/app/v1").send().await.unwrap();
        assert_eq!(manifest.headers()["content-type"], "application/json");
        let manifest: Manifest = json::from_json(&manifest.text().await.unwrap()).unwrap();
        assert_eq!(manifest.reference, "ref-1");
    }

    #[tokio::test]
    async fn webhook_routes() {
        let server = start().await;
        let created = server
            .http
            .post(format!("{}/webhook/acme/app", server.base))
            .basic_auth("admin", Some("secret"))
            .body(r#"{"uri":"http://127.0.0.1:9/hook","actions":["UPLOAD"],"uname":"u","pwd":"p"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 201);
        let body = created.text().await.unwrap();
        let id = body
            .split('"')
            .nth(3)
            .unwrap()
            .to_string();

        let listed = server.get("/webhook/acme/app").send().await.unwrap();
        let listed = listed.text().await.unwrap();
        assert!(listed.contains(&id));
        assert!(!listed.contains("\"pwd\""));

        let removed = server
            .delete(&format!("/webhook/acme/app/{id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(removed.status(), 204);
        let again = server
            .delete(&format!("/webhook/acme/app/{id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), 404);
    }
}
