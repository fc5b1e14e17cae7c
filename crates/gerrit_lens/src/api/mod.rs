//! Gerrit REST API client.
//!
//! All requests go to `<base>/a/<path>` with HTTP Basic credentials. Concurrent
//! identical GET requests share one round trip, and a shared read-only flag
//! blocks every mutating request before it reaches the transport.
//!
//! Read operations log failures and return `None` or an empty collection so
//! that consumers degrade to "no data". Mutations return a [`Result`] so the
//! caller can tell a refused write from a failed one.

mod coalesce;
pub mod error;
pub mod query;
pub mod response;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::Credentials;
use crate::host::{MessageLevel, Notifier};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

use coalesce::InFlight;
pub use error::{GerritError, Result, short_error_message};
pub use query::{ChangeQuery, QueryParams, WithValue, WithValues, normalize_filters};
pub use response::{MAGIC_PREFIX, parse_json, strip_magic_prefix};
use types::{
    AccountInfo, ChangeInfo, CommentInfo, CommentInput, FileInfo, GroupInfo, ProjectInfo,
    ReviewInput,
};

/// Callback receiving the status and raw body of a failed request.
pub type ErrorCallback = Arc<dyn Fn(u16, &str) + Send + Sync>;

/// Per-request options.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub query: QueryParams,
    pub body: Option<serde_json::Value>,
    /// Invoked on non-2xx responses instead of the generic failure message.
    pub on_error: Option<ErrorCallback>,
}

impl RequestOptions {
    #[must_use]
    pub fn query(query: QueryParams) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }
}

/// One page of a change search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangesPage {
    pub changes: Vec<ChangeInfo>,
    /// Whether the server has results past this page.
    pub more: bool,
}

/// Message shown when a read request fails and the caller has no handler.
const REQUEST_FAILED_MESSAGE: &str =
    "Gerrit request failed. Check your settings and network connection.";

/// Gerrit REST API client. Cheap to clone; clones share the in-flight table
/// and the read-only flag.
#[derive(Clone)]
pub struct GerritApi {
    inner: Arc<ApiInner>,
}

struct ApiInner {
    transport: Arc<dyn HttpTransport>,
    base: Url,
    authorization: String,
    read_only: Arc<AtomicBool>,
    in_flight: InFlight,
    notifier: Option<Arc<dyn Notifier>>,
}

impl std::fmt::Debug for GerritApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GerritApi")
            .field("base", &self.inner.base.as_str())
            .field("read_only", &self.is_read_only())
            .finish_non_exhaustive()
    }
}

impl GerritApi {
    /// Create a client over an explicit transport.
    #[must_use]
    pub fn new(credentials: &Credentials, transport: Arc<dyn HttpTransport>) -> Self {
        let token = BASE64.encode(format!(
            "{}:{}",
            credentials.username, credentials.password
        ));
        Self {
            inner: Arc::new(ApiInner {
                transport,
                base: credentials.url.clone(),
                authorization: format!("Basic {token}"),
                read_only: Arc::new(AtomicBool::new(false)),
                in_flight: InFlight::default(),
                notifier: None,
            }),
        }
    }

    /// Create a reqwest-backed client from configuration.
    #[cfg(feature = "reqwest")]
    pub fn from_config(config: &crate::config::GerritConfig) -> Result<Self> {
        use crate::http::reqwest_transport::ReqwestTransport;

        let credentials = config
            .credentials()
            .map_err(|e| GerritError::Config(e.to_string()))?;
        let transport =
            ReqwestTransport::with_options(config.request_timeout(), config.allow_invalid_ssl)?;
        let api = Self::new(&credentials, Arc::new(transport));
        api.set_read_only(config.read_only);
        Ok(api)
    }

    /// Share an externally owned read-only flag.
    #[must_use]
    pub fn with_read_only_flag(self, flag: Arc<AtomicBool>) -> Self {
        self.rebuild(|inner| inner.read_only = flag)
    }

    /// Route user-facing failures to a notifier.
    #[must_use]
    pub fn with_notifier(self, notifier: Arc<dyn Notifier>) -> Self {
        self.rebuild(|inner| inner.notifier = Some(notifier))
    }

    fn rebuild(self, f: impl FnOnce(&mut ApiInner)) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => ApiInner {
                transport: Arc::clone(&shared.transport),
                base: shared.base.clone(),
                authorization: shared.authorization.clone(),
                read_only: Arc::clone(&shared.read_only),
                in_flight: InFlight::default(),
                notifier: shared.notifier.clone(),
            },
        };
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.inner.read_only.store(read_only, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base
    }

    /// Full URL for an authenticated endpoint. Each segment is percent-encoded,
    /// so project names containing `/` stay a single segment.
    pub fn endpoint_url(&self, segments: &[&str], query: &QueryParams) -> Result<Url> {
        let mut url = self.inner.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| GerritError::Config("base URL cannot be a base".to_string()))?;
            path.pop_if_empty().push("a");
            path.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    /// Perform a request and return the raw successful response.
    pub async fn request(
        &self,
        method: HttpMethod,
        segments: &[&str],
        options: RequestOptions,
    ) -> Result<HttpResponse> {
        let url = self.endpoint_url(segments, &options.query)?;

        if method.is_mutating() && self.is_read_only() {
            let path = segments.join("/");
            tracing::warn!(
                method = method.as_str(),
                path = %path,
                "blocked mutating request in read-only mode"
            );
            self.notify(
                MessageLevel::Error,
                &format!(
                    "Read-only mode is enabled; refusing {} {}",
                    method.as_str(),
                    path
                ),
            );
            return Err(GerritError::ReadOnly {
                method: method.as_str(),
                path,
            });
        }

        let body = match &options.body {
            Some(value) => serde_json::to_vec(value)?,
            None => Vec::new(),
        };
        let request = HttpRequest::new(method, url.as_str())
            .with_header("Accept", "application/json")
            .with_header("User-Agent", "gerrit-lens")
            .with_header("Authorization", self.inner.authorization.clone())
            .with_json(body);

        let result = if method == HttpMethod::Get {
            let key = request.dedup_key();
            let transport = Arc::clone(&self.inner.transport);
            self.inner
                .in_flight
                .coalesce(key, move || send(transport, request).boxed())
                .await
        } else {
            send(Arc::clone(&self.inner.transport), request).await
        };

        if let (Err(GerritError::Http { status, body }), Some(callback)) =
            (&result, &options.on_error)
        {
            callback(*status, body);
        }
        result
    }

    /// Perform a request and parse the JSON body.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        segments: &[&str],
        options: RequestOptions,
    ) -> Result<T> {
        let response = self.request(method, segments, options).await?;
        parse_json(&response.text())
    }

    /// GET and parse, logging failures and returning `None`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        options: RequestOptions,
    ) -> Option<T> {
        let has_handler = options.on_error.is_some();
        match self.request_json(HttpMethod::Get, segments, options).await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(path = %segments.join("/"), error = %err, "Gerrit read failed");
                let handled = has_handler && matches!(err, GerritError::Http { .. });
                if !handled {
                    self.notify(MessageLevel::Error, REQUEST_FAILED_MESSAGE);
                }
                None
            }
        }
    }

    fn notify(&self, level: MessageLevel, message: &str) {
        if let Some(notifier) = &self.inner.notifier {
            notifier.notify(level, message, &["Open settings"]);
        }
    }

    // ---------- Changes ----------

    /// Fetch one change with the given expansions.
    pub async fn get_change(&self, change_id: &str, with: &WithValues) -> Option<ChangeInfo> {
        let mut query = QueryParams::new();
        query.with_values(with);
        self.get_json(&["changes", change_id], RequestOptions::query(query))
            .await
    }

    /// Run a paged change search.
    ///
    /// With more than one filter group Gerrit answers with one result list per
    /// group; those are merged in group order with duplicates dropped.
    pub async fn query_changes(&self, query: &ChangeQuery) -> Option<ChangesPage> {
        self.query_changes_with(query, RequestOptions::default())
            .await
    }

    /// [`GerritApi::query_changes`] with a custom error handler.
    pub async fn query_changes_with(
        &self,
        query: &ChangeQuery,
        options: RequestOptions,
    ) -> Option<ChangesPage> {
        let options = RequestOptions {
            query: query.to_params(),
            ..options
        };
        let raw: serde_json::Value = self.get_json(&["changes", ""], options).await?;
        match merge_change_pages(raw) {
            Ok(page) => Some(page),
            Err(err) => {
                tracing::warn!(error = %err, "unexpected change search response");
                None
            }
        }
    }

    // ---------- Revisions and files ----------

    /// Files of a revision, optionally diffed against patchset `base`.
    pub async fn files(
        &self,
        change_id: &str,
        revision: &str,
        base: Option<u32>,
    ) -> Option<BTreeMap<String, FileInfo>> {
        let mut query = QueryParams::new();
        if let Some(base) = base {
            query.push("base", base.to_string());
        }
        self.get_json(
            &["changes", change_id, "revisions", revision, "files", ""],
            RequestOptions::query(query),
        )
        .await
    }

    /// Content of a file at a commit. The endpoint answers with base64 text.
    pub async fn file_content(&self, project: &str, commit: &str, path: &str) -> Option<String> {
        self.base64_content(
            &["projects", project, "commits", commit, "files", path, "content"],
            QueryParams::new(),
        )
        .await
    }

    /// Content of a file in parent `parent` (1-based) of a revision.
    pub async fn parent_file_content(
        &self,
        change_id: &str,
        revision: &str,
        path: &str,
        parent: u32,
    ) -> Option<String> {
        let mut query = QueryParams::new();
        query.push("parent", parent.to_string());
        self.base64_content(
            &["changes", change_id, "revisions", revision, "files", path, "content"],
            query,
        )
        .await
    }

    async fn base64_content(&self, segments: &[&str], query: QueryParams) -> Option<String> {
        let response = self
            .request(HttpMethod::Get, segments, RequestOptions::query(query))
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(path = %segments.join("/"), error = %err, "file content unavailable");
                return None;
            }
        };
        let decoded = BASE64
            .decode(strip_magic_prefix(&response.text()).as_bytes())
            .map_err(|e| tracing::warn!(error = %e, "file content is not base64"))
            .ok()?;
        Some(String::from_utf8_lossy(&decoded).into_owned())
    }

    // ---------- Comments ----------

    /// Published comments of a change, keyed by file path.
    pub async fn comments(&self, change_id: &str) -> Option<BTreeMap<String, Vec<CommentInfo>>> {
        self.get_json(&["changes", change_id, "comments"], RequestOptions::default())
            .await
    }

    /// The caller's draft comments on a change, keyed by file path.
    pub async fn drafts(&self, change_id: &str) -> Option<BTreeMap<String, Vec<CommentInfo>>> {
        self.get_json(&["changes", change_id, "drafts"], RequestOptions::default())
            .await
    }

    pub async fn create_draft(
        &self,
        change_id: &str,
        revision: &str,
        input: &CommentInput,
    ) -> Result<CommentInfo> {
        self.request_json(
            HttpMethod::Put,
            &["changes", change_id, "revisions", revision, "drafts"],
            RequestOptions::json(serde_json::to_value(input)?),
        )
        .await
    }

    pub async fn update_draft(
        &self,
        change_id: &str,
        revision: &str,
        draft_id: &str,
        input: &CommentInput,
    ) -> Result<CommentInfo> {
        self.request_json(
            HttpMethod::Put,
            &["changes", change_id, "revisions", revision, "drafts", draft_id],
            RequestOptions::json(serde_json::to_value(input)?),
        )
        .await
    }

    pub async fn delete_draft(&self, change_id: &str, revision: &str, draft_id: &str) -> Result<()> {
        self.request(
            HttpMethod::Delete,
            &["changes", change_id, "revisions", revision, "drafts", draft_id],
            RequestOptions::default(),
        )
        .await
        .map(|_| ())
    }

    /// Post a review (message, votes, publish drafts).
    pub async fn set_review(
        &self,
        change_id: &str,
        revision: &str,
        input: &ReviewInput,
    ) -> Result<()> {
        self.request(
            HttpMethod::Post,
            &["changes", change_id, "revisions", revision, "review"],
            RequestOptions::json(serde_json::to_value(input)?),
        )
        .await
        .map(|_| ())
    }

    // ---------- Accounts, projects, groups ----------

    /// The authenticated account. Unlike the other reads this reports the
    /// error, so callers can tell bad credentials from an unreachable server.
    pub async fn self_account(&self) -> Result<AccountInfo> {
        self.request_json(
            HttpMethod::Get,
            &["accounts", "self", "detail"],
            RequestOptions::default(),
        )
        .await
    }

    pub async fn suggest_accounts(&self, query: &str, limit: u32) -> Vec<AccountInfo> {
        let mut params = QueryParams::new();
        params
            .push("suggest", "")
            .push("q", query)
            .push("n", limit.to_string());
        self.get_json(&["accounts", ""], RequestOptions::query(params))
            .await
            .unwrap_or_default()
    }

    pub async fn suggest_projects(&self, prefix: &str, limit: u32) -> Vec<ProjectInfo> {
        let mut params = QueryParams::new();
        params.push("p", prefix).push("n", limit.to_string());
        let projects: Option<BTreeMap<String, ProjectInfo>> = self
            .get_json(&["projects", ""], RequestOptions::query(params))
            .await;
        projects
            .unwrap_or_default()
            .into_iter()
            .map(|(name, mut project)| {
                project.name.get_or_insert(name);
                project
            })
            .collect()
    }

    pub async fn suggest_groups(&self, query: &str, limit: u32) -> Vec<GroupInfo> {
        let mut params = QueryParams::new();
        params.push("suggest", query).push("n", limit.to_string());
        let groups: Option<BTreeMap<String, GroupInfo>> = self
            .get_json(&["groups", ""], RequestOptions::query(params))
            .await;
        groups
            .unwrap_or_default()
            .into_iter()
            .map(|(name, mut group)| {
                group.name.get_or_insert(name);
                group
            })
            .collect()
    }
}

async fn send(transport: Arc<dyn HttpTransport>, request: HttpRequest) -> Result<HttpResponse> {
    let method = request.method.as_str();
    let url = request.url.clone();
    tracing::debug!(method, url = %url, "Gerrit request");

    let response = transport.send(request).await.map_err(|e| {
        tracing::warn!(method, url = %url, error = %e, "Gerrit request failed");
        GerritError::from(e)
    })?;

    if !response.is_success() {
        let body = response.text();
        tracing::warn!(method, url = %url, status = response.status, "Gerrit returned an error");
        return Err(GerritError::Http {
            status: response.status,
            body,
        });
    }
    Ok(response)
}

fn merge_change_pages(raw: serde_json::Value) -> Result<ChangesPage> {
    let lists: Vec<Vec<ChangeInfo>> = match raw {
        serde_json::Value::Array(items) if items.iter().all(|i| i.is_array()) && !items.is_empty() => {
            serde_json::from_value(serde_json::Value::Array(items))?
        }
        other => vec![serde_json::from_value(other)?],
    };

    let mut page = ChangesPage::default();
    let mut seen = std::collections::HashSet::new();
    for list in lists {
        for change in list {
            page.more |= change.more_changes.unwrap_or(false);
            if seen.insert(change.id.clone()) {
                page.changes.push(change);
            }
        }
    }
    Ok(page)
}
