//! Nexus 3 backend: files live in the `artisan` raw repository under
//! `<group>/<name>/`.

use super::{REPOSITORY_FILE, StorageBackend, repository_path, validate_file_name};
use artisan_core::{Credentials, Error, Package, Repository, Result, json, validate_file_ref};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Raw repository holding registry files.
const RAW_REPOSITORY: &str = "artisan";

#[derive(Debug, Deserialize)]
struct AssetPage {
    #[serde(default)]
    items: Vec<Asset>,
    #[serde(rename = "continuationToken", default)]
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    id: String,
    path: String,
}

/// Stores registry files in a Nexus 3 raw repository.
#[derive(Debug, Clone)]
pub struct Nexus3Backend {
    client: Client,
    domain: String,
    credentials: Credentials,
}

impl Nexus3Backend {
    /// Backend for the Nexus instance at `domain` (scheme included).
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(domain: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Config(format!("cannot build nexus client: {e}")))?;
        Ok(Self {
            client,
            domain: domain.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.domain, path.trim_start_matches('/'));
        let request = self.client.request(method, url);
        if self.credentials.is_set() {
            request.basic_auth(&self.credentials.user, Some(&self.credentials.password))
        } else {
            request
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("nexus request for {what} failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::Auth(format!("nexus rejected the credentials for {what}"))
            }
            StatusCode::NOT_FOUND => Error::not_found(what.to_string()),
            _ => Error::Transport(format!("nexus returned {status} for {what}")),
        })
    }

    async fn upload_assets(&self, group: &str, name: &str, assets: Vec<(String, Bytes)>) -> Result<()> {
        let directory = repository_path(group, name);
        let mut form = Form::new().text("raw.directory", directory.clone());
        for (i, (filename, data)) in assets.into_iter().enumerate() {
            let field = format!("raw.asset{}", i + 1);
            form = form
                .part(field.clone(), Part::bytes(data.to_vec()).file_name(filename.clone()))
                .text(format!("{field}.filename"), filename);
        }
        let request = self
            .request(Method::POST, "service/rest/v1/components")
            .query(&[("repository", RAW_REPOSITORY)])
            .multipart(form);
        self.send(request, &format!("upload to {directory}")).await?;
        Ok(())
    }

    async fn asset_page(&self, path: &str, query: &[(&str, &str)], what: &str) -> Result<AssetPage> {
        let response = self
            .send(self.request(Method::GET, path).query(query), what)
            .await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("reading {what}: {e}")))?;
        json::from_json_strict(&body, what)
    }

    async fn delete_file(&self, group: &str, name: &str, filename: &str) -> Result<()> {
        let asset_name = format!("{}/{filename}", repository_path(group, name));
        let page = self
            .asset_page(
                "service/rest/v1/search/assets",
                &[("repository", RAW_REPOSITORY), ("name", asset_name.as_str())],
                &format!("asset search for {asset_name}"),
            )
            .await?;
        for asset in page.items {
            self.send(
                self.request(Method::DELETE, &format!("service/rest/v1/assets/{}", asset.id)),
                &format!("asset {}", asset.path),
            )
            .await?;
            debug!(asset = %asset.path, "nexus asset deleted");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for Nexus3Backend {
    fn kind(&self) -> &'static str {
        "nexus"
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
        let metadata = Bytes::from(json::to_json_pretty(repository)?);
        self.upload_assets(
            group,
            name,
            vec![
                (format!("{file_ref}.zip"), content),
                (format!("{file_ref}.json"), seal),
                (REPOSITORY_FILE.to_string(), metadata),
            ],
        )
        .await
    }

    async fn download(&self, group: &str, name: &str, filename: &str) -> Result<Bytes> {
        validate_file_name(filename)?;
        let path = format!(
            "repository/{RAW_REPOSITORY}/{}/{filename}",
            repository_path(group, name)
        );
        let what = format!("file {filename} in {}", repository_path(group, name));
        let response = self.send(self.request(Method::GET, &path), &what).await?;
        response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("reading {what}: {e}")))
    }

    async fn get_repository_info(&self, group: &str, name: &str) -> Result<Repository> {
        let empty = || Repository::new(repository_path(group, name));
        let bytes = match self.download(group, name, REPOSITORY_FILE).await {
            Ok(bytes) => bytes,
            Err(Error::NotFound(_)) => return Ok(empty()),
            Err(e) => return Err(e),
        };
        json::from_json_slice(&bytes).map_err(|e| {
            Error::CorruptData(format!(
                "repository metadata for {}: {e}",
                repository_path(group, name)
            ))
        })
    }

    async fn get_all_repository_info(&self) -> Result<Vec<Repository>> {
        let suffix = format!("/{REPOSITORY_FILE}");
        let mut directories = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![("repository", RAW_REPOSITORY)];
            if let Some(token) = token.as_deref() {
                query.push(("continuationToken", token));
            }
            let page = self
                .asset_page("service/rest/v1/assets", &query, "asset listing")
                .await?;
            directories.extend(page.items.into_iter().filter_map(|asset| {
                asset
                    .path
                    .trim_start_matches('/')
                    .strip_suffix(&suffix)
                    .map(str::to_string)
            }));
            match page.continuation_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => break,
            }
        }

        directories.sort();
        let mut repositories = Vec::with_capacity(directories.len());
        for directory in &directories {
            let Some((group, name)) = directory.rsplit_once('/') else {
                continue;
            };
            repositories.push(self.get_repository_info(group, name).await?);
        }
        Ok(repositories)
    }

    async fn put_repository_info(&self, group: &str, name: &str, repository: &Repository) -> Result<()> {
        let metadata = Bytes::from(json::to_json_pretty(repository)?);
        self.upload_assets(group, name, vec![(REPOSITORY_FILE.to_string(), metadata)])
            .await
    }

    async fn delete_package(&self, group: &str, name: &str, package: &Package) -> Result<()> {
        validate_file_ref(&package.file_ref)?;
        let mut repository = self.get_repository_info(group, name).await?;
        repository.remove_package(&package.id);
        self.put_repository_info(group, name, &repository).await?;

        self.delete_file(group, name, &format!("{}.zip", package.file_ref))
            .await?;
        self.delete_file(group, name, &format!("{}.json", package.file_ref))
            .await
    }
}
