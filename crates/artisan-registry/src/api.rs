//! HTTP calls against a remote registry.
//!
//! Each call is a single attempt; retries are composed by the callers. The
//! first call of an API instance negotiates the scheme: HTTPS is tried first
//! and, when it fails at the transport level, the identical call is repeated
//! over plain HTTP. Whichever scheme answers is used for every later call.

use crate::config::{ClientConfig, TlsMode};
use crate::error::{ProtocolError, Result};
use artisan_core::{Credentials, Manifest, Package, Repository, json};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::OnceLock;
use tracing::{debug, warn};
use url::Url;

/// Transport scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// TLS.
    Https,
    /// Plain text.
    Http,
}

impl Scheme {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Result of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// The server stored new content or a new tag.
    Created,
    /// The server already had this package and tag.
    AlreadyPresent,
}

/// Client for one registry domain.
pub struct RegistryApi {
    client: Client,
    domain: String,
    credentials: Credentials,
    tls: TlsMode,
    scheme: OnceLock<Scheme>,
}

impl std::fmt::Debug for RegistryApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryApi")
            .field("client", &"reqwest::Client")
            .field("domain", &self.domain)
            .field("credentials", &self.credentials)
            .field("scheme", &self.scheme.get())
            .finish()
    }
}

impl RegistryApi {
    /// Create a client for `domain` (host with optional port, no scheme).
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(domain: impl Into<String>, credentials: Credentials, config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProtocolError::transport("client builder", &e))?;
        Ok(Self {
            client,
            domain: domain.into(),
            credentials,
            tls: config.tls,
            scheme: OnceLock::new(),
        })
    }

    /// Registry domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Scheme negotiated so far, if any call has completed.
    #[must_use]
    pub fn negotiated_scheme(&self) -> Option<Scheme> {
        self.scheme.get().copied()
    }

    /// `GET /repository/{group}/{name}`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedResponse`] when the endpoint does not
    /// behave like a registry.
    pub async fn get_repository_info(&self, group: &str, name: &str) -> Result<Repository> {
        let (url, response) = self
            .send(&["repository", group, name], |c, u| c.get(u))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ProtocolError::MalformedResponse {
                url,
                message: "the repository endpoint does not exist".into(),
            }),
            _ => {
                let response = check(response, &url, &format!("{group}/{name}")).await?;
                read_json(response, &url).await
            }
        }
    }

    /// `GET /repository`.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-registry response.
    pub async fn get_all_repository_info(&self) -> Result<Vec<Repository>> {
        let (url, response) = self.send(&["repository"], |c, u| c.get(u)).await?;
        let response = check(response, &url, "*").await?;
        read_json(response, &url).await
    }

    /// `GET /package/info/{group}/{name}/id/{id}`; `None` when absent.
    ///
    /// # Errors
    /// Returns error on transport failure or a non-registry response.
    pub async fn get_package_info(&self, group: &str, name: &str, id: &str) -> Result<Option<Package>> {
        let (url, response) = self
            .send(&["package", "info", group, name, "id", id], |c, u| c.get(u))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response, &url, &format!("{group}/{name}")).await?;
        read_json(response, &url).await.map(Some)
    }

    /// `PUT /package/info/{group}/{name}/id/{id}`.
    ///
    /// # Errors
    /// Returns error if the server rejects the update.
    pub async fn put_package_info(&self, group: &str, name: &str, package: &Package) -> Result<()> {
        let body = json::to_json(package)?;
        let (url, response) = self
            .send(&["package", "info", group, name, "id", &package.id], |c, u| {
                c.put(u)
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;
        check(response, &url, &format!("{group}/{name}")).await?;
        Ok(())
    }

    /// `DELETE /package/info/{group}/{name}/id/{id}`.
    ///
    /// # Errors
    /// Returns error if the server rejects the deletion.
    pub async fn delete_package_info(&self, group: &str, name: &str, id: &str) -> Result<()> {
        let (url, response) = self
            .send(&["package", "info", group, name, "id", id], |c, u| c.delete(u))
            .await?;
        check(response, &url, &format!("{group}/{name}")).await?;
        Ok(())
    }

    /// `GET /package/manifest/{group}/{name}/{tag}`.
    ///
    /// # Errors
    /// Returns error if the tag does not exist.
    pub async fn get_manifest(&self, group: &str, name: &str, tag: &str) -> Result<Manifest> {
        let (url, response) = self
            .send(&["package", "manifest", group, name, tag], |c, u| c.get(u))
            .await?;
        let response = check(response, &url, &format!("{group}/{name}")).await?;
        read_json(response, &url).await
    }

    /// `POST /package/{group}/{name}/tag/{tag}` with the package metadata,
    /// content archive and seal.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Locked`] if the repository is locked.
    pub async fn upload(
        &self,
        group: &str,
        name: &str,
        tag: &str,
        package: &Package,
        content: Bytes,
        seal: Bytes,
    ) -> Result<UploadStatus> {
        let meta = STANDARD.encode(json::to_json(package)?);
        let file_ref = package.file_ref.clone();
        let (url, response) = self
            .send(&["package", group, name, "tag", tag], |c, u| {
                let form = Form::new()
                    .text("package-meta", meta.clone())
                    .part(
                        "package-file",
                        Part::bytes(content.to_vec()).file_name(format!("{file_ref}.zip")),
                    )
                    .part(
                        "package-seal",
                        Part::bytes(seal.to_vec()).file_name(format!("{file_ref}.json")),
                    );
                c.post(u).multipart(form)
            })
            .await?;
        let response = check(response, &url, &format!("{group}/{name}")).await?;
        Ok(if response.status() == StatusCode::OK {
            UploadStatus::AlreadyPresent
        } else {
            UploadStatus::Created
        })
    }

    /// `GET /file/{group}/{name}/{filename}`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::NotFound`] if the file does not exist.
    pub async fn download(&self, group: &str, name: &str, filename: &str) -> Result<Bytes> {
        let (url, response) = self
            .send(&["file", group, name, filename], |c, u| c.get(u))
            .await?;
        let response = check(response, &url, &format!("{group}/{name}")).await?;
        response
            .bytes()
            .await
            .map_err(|e| ProtocolError::transport(&url, &e))
    }

    /// `DELETE /package/{group}/{name}/tag/{tag}`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::NotFound`] if the tag does not exist.
    pub async fn delete_tag(&self, group: &str, name: &str, tag: &str) -> Result<()> {
        let (url, response) = self
            .send(&["package", group, name, "tag", tag], |c, u| c.delete(u))
            .await?;
        check(response, &url, &format!("{group}/{name}")).await?;
        Ok(())
    }

    fn url(&self, scheme: Scheme, segments: &[&str]) -> Result<Url> {
        let base = format!("{}://{}/", scheme.as_str(), self.domain);
        let mut url = Url::parse(&base).map_err(|e| ProtocolError::Transport {
            url: base.clone(),
            message: e.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|()| ProtocolError::Transport {
                url: base.clone(),
                message: "domain cannot be a base URL".into(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn schemes(&self) -> &'static [Scheme] {
        match (self.scheme.get(), self.tls) {
            (Some(Scheme::Https), _) | (None, TlsMode::Require) => &[Scheme::Https],
            (Some(Scheme::Http), _) | (None, TlsMode::Disable) => &[Scheme::Http],
            (None, TlsMode::Probe) => &[Scheme::Https, Scheme::Http],
        }
    }

    /// Send one request, negotiating the scheme on first use.
    async fn send<F>(&self, segments: &[&str], build: F) -> Result<(String, Response)>
    where
        F: Fn(&Client, Url) -> RequestBuilder,
    {
        let schemes = self.schemes();
        let mut failure = None;
        for (i, scheme) in schemes.iter().copied().enumerate() {
            let url = self.url(scheme, segments)?;
            let mut request = build(&self.client, url.clone())
                .header(ACCEPT, HeaderValue::from_static("application/json"));
            if self.credentials.is_set() {
                request = request.header(AUTHORIZATION, self.credentials.basic_header());
            }

            debug!(url = %url, "registry request");
            match request.send().await {
                Ok(response) => {
                    debug!(url = %url, status = %response.status(), "registry response");
                    if self.scheme.set(scheme).is_ok() && scheme == Scheme::Http {
                        debug!(domain = %self.domain, "using plain HTTP for this session");
                    }
                    return Ok((url.to_string(), response));
                }
                Err(e) if i + 1 < schemes.len() => {
                    warn!(
                        domain = %self.domain,
                        error = %e,
                        "HTTPS connection failed, falling back to an insecure HTTP connection"
                    );
                    failure = Some(ProtocolError::transport(url.as_str(), &e));
                }
                Err(e) => return Err(ProtocolError::transport(url.as_str(), &e)),
            }
        }
        Err(failure.unwrap_or(ProtocolError::Transport {
            url: self.domain.clone(),
            message: "no scheme available".into(),
        }))
    }
}

async fn check(response: Response, url: &str, repository: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = url.to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProtocolError::AuthRejected {
            url,
            status: status.as_u16(),
        }),
        StatusCode::NOT_FOUND => Err(ProtocolError::NotFound { url }),
        StatusCode::LOCKED => Err(ProtocolError::Locked {
            repository: repository.to_string(),
        }),
        _ => Err(ProtocolError::Status {
            url,
            status: status.as_u16(),
            message: response.text().await.unwrap_or_else(|_| status.to_string()),
        }),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response, url: &str) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProtocolError::transport(url, &e))?;
    json::from_json_slice(&bytes).map_err(|e| ProtocolError::MalformedResponse {
        url: url.to_string(),
        message: e.to_string(),
    })
}
