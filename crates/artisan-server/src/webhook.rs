//! Webhook subscriptions and event delivery.
//!
//! Subscriptions are kept in one JSON document, re-read on every call so
//! several server processes can share it. Document IO runs on the blocking
//! pool. Delivery is fire-and-forget: each matching hook gets one POST on a
//! spawned task and failures are only logged.

use artisan_core::{Credentials, Error, Result, json};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle events a hook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookAction {
    /// New content was uploaded.
    Upload,
    /// A tag was added to existing content.
    Tagged,
    /// A tag was removed, content kept.
    Untagged,
    /// Content was deleted.
    Removed,
}

impl WebhookAction {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "UPLOAD",
            Self::Tagged => "TAGGED",
            Self::Untagged => "UNTAGGED",
            Self::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for WebhookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UPLOAD" => Ok(Self::Upload),
            "TAGGED" => Ok(Self::Tagged),
            "UNTAGGED" => Ok(Self::Untagged),
            "REMOVED" => Ok(Self::Removed),
            _ => Err(Error::validation(format!("unknown webhook action '{s}'"))),
        }
    }
}

/// One subscription.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    /// Stable id (UUID v4).
    pub id: String,
    /// Repository group.
    pub group: String,
    /// Repository name.
    pub name: String,
    /// Subscribed actions.
    pub actions: Vec<WebhookAction>,
    /// Delivery URI.
    pub uri: String,
    /// Basic auth user for delivery.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uname: String,
    /// Basic auth password for delivery.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pwd: String,
}

impl fmt::Debug for Webhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Webhook")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("name", &self.name)
            .field("actions", &self.actions)
            .field("uri", &self.uri)
            .field("uname", &self.uname)
            .finish()
    }
}

impl Webhook {
    /// Copy without the password, for listings.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            pwd: String::new(),
            ..self.clone()
        }
    }

    fn credentials(&self) -> Option<Credentials> {
        let credentials = Credentials::new(&self.uname, &self.pwd);
        (!self.uname.is_empty()).then_some(credentials)
    }
}

/// Payload of a subscription request.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRequest {
    /// Delivery URI.
    pub uri: String,
    /// Subscribed actions.
    pub actions: Vec<WebhookAction>,
    /// Basic auth user.
    #[serde(default)]
    pub uname: String,
    /// Basic auth password.
    #[serde(default)]
    pub pwd: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WebhookDocument {
    #[serde(default)]
    hooks: Vec<Webhook>,
}

/// The subscription store.
#[derive(Debug, Clone)]
pub struct WebhookRegistry {
    store: Arc<Store>,
}

#[derive(Debug)]
struct Store {
    path: PathBuf,
    io: Mutex<()>,
}

impl Store {
    fn load(&self) -> Result<WebhookDocument> {
        match std::fs::read(&self.path) {
            Ok(bytes) => json::from_json_strict(&bytes, &self.path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(WebhookDocument::default()),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }

    fn save(&self, doc: &WebhookDocument) -> Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
        temp.write_all(json::to_json_pretty(doc)?.as_bytes())
            .map_err(|e| Error::io(temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| Error::io(&self.path, e.error))?;
        Ok(())
    }

    fn upsert(&self, group: &str, name: &str, request: WebhookRequest) -> Result<String> {
        let _io = self.io.lock();
        let mut doc = self.load()?;
        let existing = doc
            .hooks
            .iter_mut()
            .find(|h| h.group == group && h.name == name && h.uri == request.uri);
        let id = match existing {
            Some(hook) => {
                hook.actions = request.actions;
                hook.uname = request.uname;
                hook.pwd = request.pwd;
                hook.id.clone()
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                doc.hooks.push(Webhook {
                    id: id.clone(),
                    group: group.to_string(),
                    name: name.to_string(),
                    actions: request.actions,
                    uri: request.uri,
                    uname: request.uname,
                    pwd: request.pwd,
                });
                id
            }
        };
        self.save(&doc)?;
        Ok(id)
    }

    fn remove(&self, group: &str, name: &str, id: &str) -> Result<bool> {
        let _io = self.io.lock();
        let mut doc = self.load()?;
        let Some(index) = doc
            .hooks
            .iter()
            .position(|h| h.group == group && h.name == name && h.id == id)
        else {
            return Ok(false);
        };
        doc.hooks.swap_remove(index);
        self.save(&doc)?;
        Ok(true)
    }

    fn list(&self, group: &str, name: &str) -> Result<Vec<Webhook>> {
        let _io = self.io.lock();
        Ok(self
            .load()?
            .hooks
            .into_iter()
            .filter(|h| h.group == group && h.name == name)
            .collect())
    }
}

impl WebhookRegistry {
    /// Store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: Arc::new(Store {
                path: path.into(),
                io: Mutex::new(()),
            }),
        }
    }

    /// Document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.store.path
    }

    /// Run `task` against the store on the blocking pool.
    async fn blocking<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || task(&store))
            .await
            .map_err(|e| Error::io(self.path(), std::io::Error::other(e)))?
    }

    /// Subscribe `request.uri` to events of `group/name`.
    ///
    /// A hook with the same repository and URI is updated in place and keeps
    /// its id. Returns the hook id.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] for a non-HTTP URI or no actions.
    pub async fn add(&self, group: &str, name: &str, request: WebhookRequest) -> Result<String> {
        let uri = url::Url::parse(&request.uri)
            .map_err(|e| Error::validation(format!("invalid webhook uri '{}': {e}", request.uri)))?;
        if !matches!(uri.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "webhook uri '{}' must use http or https",
                request.uri
            )));
        }
        if request.actions.is_empty() {
            return Err(Error::validation("a webhook needs at least one action"));
        }

        let (g, n) = (group.to_string(), name.to_string());
        let id = self
            .blocking(move |store| store.upsert(&g, &n, request))
            .await?;
        info!(group, name, id = %id, "webhook registered");
        Ok(id)
    }

    /// Remove the hook `id` of `group/name`. Returns false if there is none.
    ///
    /// # Errors
    /// Returns error if the document cannot be read or written.
    pub async fn remove(&self, group: &str, name: &str, id: &str) -> Result<bool> {
        let (g, n, i) = (group.to_string(), name.to_string(), id.to_string());
        let removed = self
            .blocking(move |store| store.remove(&g, &n, &i))
            .await?;
        if removed {
            info!(group, name, id, "webhook removed");
        }
        Ok(removed)
    }

    /// Hooks of `group/name`.
    ///
    /// # Errors
    /// Returns error if the document cannot be read.
    pub async fn list(&self, group: &str, name: &str) -> Result<Vec<Webhook>> {
        let (g, n) = (group.to_string(), name.to_string());
        self.blocking(move |store| store.list(&g, &n)).await
    }

    /// Hooks of `group/name` subscribed to `action`.
    ///
    /// # Errors
    /// Returns error if the document cannot be read.
    pub async fn subscribers(
        &self,
        group: &str,
        name: &str,
        action: WebhookAction,
    ) -> Result<Vec<Webhook>> {
        Ok(self
            .list(group, name)
            .await?
            .into_iter()
            .filter(|h| h.actions.contains(&action))
            .collect())
    }
}

/// Body POSTed to a hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Event id (UUID v4).
    pub id: String,
    /// What happened.
    pub action: WebhookAction,
    /// Repository group.
    pub group: String,
    /// Repository name.
    pub name: String,
    /// Tag involved.
    pub tag: String,
    /// Package involved.
    pub package_id: String,
    /// When it happened.
    pub time: DateTime<Utc>,
}

impl WebhookEvent {
    /// New event stamped now.
    #[must_use]
    pub fn new(action: WebhookAction, group: &str, name: &str, tag: &str, package_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            group: group.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
            package_id: package_id.to_string(),
            time: Utc::now(),
        }
    }
}

/// Sends events to subscribed hooks.
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    registry: Arc<WebhookRegistry>,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    /// Dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<WebhookRegistry>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { registry, client }
    }

    /// The subscription store.
    #[must_use]
    pub fn registry(&self) -> &Arc<WebhookRegistry> {
        &self.registry
    }

    /// Schedule delivery of `event` to every subscriber; call from within a
    /// tokio runtime. The task resolves to the number of deliveries started.
    pub fn publish(&self, event: WebhookEvent) -> JoinHandle<usize> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.deliver(event).await })
    }

    async fn deliver(&self, event: WebhookEvent) -> usize {
        let hooks = match self
            .registry
            .subscribers(&event.group, &event.name, event.action)
            .await
        {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(error = %e, "cannot read webhook subscriptions");
                return 0;
            }
        };
        let body = match json::to_json(&event) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "cannot serialize webhook event");
                return 0;
            }
        };

        for hook in &hooks {
            let mut request = self
                .client
                .post(&hook.uri)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(credentials) = hook.credentials() {
                request = request.basic_auth(credentials.user, Some(credentials.password));
            }
            let (hook_id, uri, action) = (hook.id.clone(), hook.uri.clone(), event.action);
            tokio::spawn(async move {
                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!(hook = %hook_id, %action, "webhook delivered");
                    }
                    Ok(response) => {
                        warn!(hook = %hook_id, uri = %uri, status = %response.status(), "webhook rejected");
                    }
                    Err(e) => warn!(hook = %hook_id, uri = %uri, error = %e, "webhook delivery failed"),
                }
            });
        }
        if !hooks.is_empty() {
            debug!(
                action = %event.action,
                group = %event.group,
                name = %event.name,
                hooks = hooks.len(),
                "webhook event published"
            );
        }
        hooks.len()
    }
}
