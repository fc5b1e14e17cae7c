//! The process-wide Gerrit session.
//!
//! A [`GerritSession`] owns the API client, the change and file-content
//! caches and one subscription manager per entity kind. Getters registered
//! with the managers hold only a weak reference back to the session, so
//! dropping the last session handle releases everything.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::api::types::{CommentInput, ReviewInput};
use crate::api::{ChangeQuery, GerritApi, GerritError, WithValues};
use crate::cache::{ChangeCache, FileContentCache, FileContentKey};
use crate::entity::{
    CommentKind, CommentMap, GerritChange, GerritComment, GerritFile, comment_map_from,
    merge_comment_maps,
};
use crate::subscriptions::{
    ChangeFetcher, ChangeKey, ChangeList, ChangeListFetcher, ChangeListSubscriptions,
    ChangePattern, ChangeSubscriptions, CommentManagers, CommentsFetcher, CommentsKey,
    FileSubscriptions, FilesFetcher, FilesKey, FilesPattern, JoinedSubscription, Matcher,
    Subscribable, getter, join_subscribables,
};

/// Shared session state. Cheap to clone.
#[derive(Clone)]
pub struct GerritSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    api: Option<GerritApi>,
    change_cache: ChangeCache,
    file_cache: FileContentCache,
    changes: ChangeSubscriptions,
    change_lists: ChangeListSubscriptions,
    files: FileSubscriptions,
    comments: CommentManagers,
}

impl std::fmt::Debug for GerritSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GerritSession")
            .field("api", &self.inner.api)
            .field("cached_changes", &self.inner.change_cache.len())
            .finish_non_exhaustive()
    }
}

impl GerritSession {
    /// A session over `api`. Without an API every read yields no data.
    #[must_use]
    pub fn new(api: Option<GerritApi>) -> Self {
        Self::with_refetch_interval(api, None)
    }

    /// `refetch_interval` lets managers retry entries that produced no value.
    #[must_use]
    pub fn with_refetch_interval(api: Option<GerritApi>, refetch_interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                change_cache: ChangeCache::new(),
                file_cache: FileContentCache::new(),
                changes: ChangeSubscriptions::with_refetch_interval("change", refetch_interval),
                change_lists: ChangeListSubscriptions::with_refetch_interval(
                    "change_list",
                    refetch_interval,
                ),
                files: FileSubscriptions::with_refetch_interval("files", refetch_interval),
                comments: CommentManagers::new(refetch_interval),
            }),
        }
    }

    #[cfg(feature = "reqwest")]
    pub fn from_config(config: &crate::config::GerritConfig) -> Result<Self, GerritError> {
        let api = GerritApi::from_config(config)?;
        Ok(Self::with_refetch_interval(
            Some(api),
            config.refetch_interval(),
        ))
    }

    #[must_use]
    pub fn api(&self) -> Option<&GerritApi> {
        self.inner.api.as_ref()
    }

    #[must_use]
    pub fn change_cache(&self) -> &ChangeCache {
        &self.inner.change_cache
    }

    #[must_use]
    pub fn file_cache(&self) -> &FileContentCache {
        &self.inner.file_cache
    }

    #[must_use]
    pub fn change_subscriptions(&self) -> &ChangeSubscriptions {
        &self.inner.changes
    }

    #[must_use]
    pub fn change_list_subscriptions(&self) -> &ChangeListSubscriptions {
        &self.inner.change_lists
    }

    #[must_use]
    pub fn file_subscriptions(&self) -> &FileSubscriptions {
        &self.inner.files
    }

    #[must_use]
    pub fn comment_subscriptions(&self) -> &CommentManagers {
        &self.inner.comments
    }

    fn weak(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    // ---------- Fetchers ----------

    /// Live view of one change with the given expansions.
    #[must_use]
    pub fn change_fetcher(&self, change_id: &str, with: WithValues) -> ChangeFetcher {
        let key = ChangeKey::new(change_id, with);
        let weak = self.weak();
        let (id, flags) = (key.change_id.clone(), key.with.clone());
        self.inner.changes.create_fetcher(
            key,
            getter(move || fetch_change(weak.clone(), id.clone(), flags.clone())),
        )
    }

    /// Live view of one page of a search. Each fetched change is also stored
    /// in the change cache under the search's expansions.
    #[must_use]
    pub fn change_list_fetcher(&self, query: ChangeQuery) -> ChangeListFetcher {
        let weak = self.weak();
        let request = query.clone();
        self.inner.change_lists.create_fetcher(
            query,
            getter(move || {
                let weak = weak.clone();
                let query = request.clone();
                async move {
                    let inner = weak.upgrade()?;
                    let page = inner.api.as_ref()?.query_changes(&query).await?;
                    let changes = page
                        .changes
                        .into_iter()
                        .map(|info| {
                            let change = Arc::new(GerritChange::from_info(info, query.with.clone()));
                            inner
                                .change_cache
                                .set(change.id(), &query.with, Arc::clone(&change));
                            change
                        })
                        .collect();
                    Some(ChangeList {
                        changes,
                        more: page.more,
                    })
                }
            }),
        )
    }

    /// Live file list of a revision of a change in `project`.
    #[must_use]
    pub fn files_fetcher(&self, project: &str, key: FilesKey) -> FilesFetcher {
        let weak = self.weak();
        let (project, request) = (project.to_string(), key.clone());
        self.inner.files.create_fetcher(
            key,
            getter(move || {
                let weak = weak.clone();
                let project = project.clone();
                let key = request.clone();
                async move {
                    let inner = weak.upgrade()?;
                    let raw = inner
                        .api
                        .as_ref()?
                        .files(&key.change_id, &key.revision.id, key.base.as_ref().map(|b| b.number))
                        .await?;
                    Some(
                        raw.into_iter()
                            .map(|(path, info)| {
                                GerritFile::new(
                                    &key.change_id,
                                    &project,
                                    &path,
                                    info,
                                    key.revision.clone(),
                                    key.base.clone(),
                                )
                            })
                            .collect(),
                    )
                }
            }),
        )
    }

    #[must_use]
    pub fn published_comments_fetcher(&self, change_id: &str) -> CommentsFetcher {
        self.comments_fetcher(change_id, CommentKind::Published)
    }

    #[must_use]
    pub fn draft_comments_fetcher(&self, change_id: &str) -> CommentsFetcher {
        self.comments_fetcher(change_id, CommentKind::Draft)
    }

    fn comments_fetcher(&self, change_id: &str, kind: CommentKind) -> CommentsFetcher {
        let weak = self.weak();
        let id = change_id.to_string();
        let manager = match kind {
            CommentKind::Published => &self.inner.comments.published,
            CommentKind::Draft => &self.inner.comments.drafts,
        };
        manager.create_fetcher(
            CommentsKey::new(change_id),
            getter(move || {
                let weak = weak.clone();
                let id = id.clone();
                async move {
                    let inner = weak.upgrade()?;
                    let api = inner.api.as_ref()?;
                    let raw = match kind {
                        CommentKind::Published => api.comments(&id).await?,
                        CommentKind::Draft => api.drafts(&id).await?,
                    };
                    Some(comment_map_from(&id, raw, kind))
                }
            }),
        )
    }

    /// Published comments and drafts of a change joined into one map, each
    /// path's list ordered by update time.
    #[must_use]
    pub fn comments_subscription(&self, change_id: &str) -> JoinedSubscription<CommentMap, CommentMap> {
        let published: Arc<dyn Subscribable<CommentMap>> =
            Arc::new(self.published_comments_fetcher(change_id));
        let drafts: Arc<dyn Subscribable<CommentMap>> =
            Arc::new(self.draft_comments_fetcher(change_id));
        join_subscribables(merge_comment_maps, vec![published, drafts])
    }

    // ---------- One-shot reads ----------

    /// A change with at least the requested expansions. Served from the
    /// change cache when any cached copy satisfies `with`.
    pub async fn get_change(&self, change_id: &str, with: &WithValues) -> Option<Arc<GerritChange>> {
        if let Some(cached) = self.inner.change_cache.get(change_id, with) {
            return Some(cached);
        }
        self.change_fetcher(change_id, with.clone())
            .get_value(false)
            .await
    }

    /// One-shot file list of a revision.
    pub async fn files(&self, project: &str, key: FilesKey) -> Option<Vec<GerritFile>> {
        self.files_fetcher(project, key).get_value(false).await
    }

    /// One-shot joined comments of a change.
    pub async fn comments(&self, change_id: &str) -> Option<CommentMap> {
        self.comments_subscription(change_id).get_value(false).await
    }

    /// Content of `path` at commit `revision` of `project`.
    pub async fn file_content(&self, project: &str, revision: &str, path: &str) -> Option<String> {
        let key = FileContentKey::new(project, revision, path);
        if let Some(content) = self.inner.file_cache.get(&key) {
            return Some(content);
        }
        let content = self.api()?.file_content(project, revision, path).await?;
        self.inner.file_cache.set(key, content.clone());
        Some(content)
    }

    /// Content of `path` in the first parent of `revision`. Cached under the
    /// revision name `<sha>^1`.
    pub async fn parent_file_content(
        &self,
        project: &str,
        change_id: &str,
        revision: &str,
        path: &str,
    ) -> Option<String> {
        let key = FileContentKey::new(project, &format!("{revision}^1"), path);
        if let Some(content) = self.inner.file_cache.get(&key) {
            return Some(content);
        }
        let content = self
            .api()?
            .parent_file_content(change_id, revision, path, 1)
            .await?;
        self.inner.file_cache.set(key, content.clone());
        Some(content)
    }

    // ---------- Invalidation ----------

    /// Drop cached copies of a change and refetch every live view of it:
    /// the change itself, its file lists and its comments.
    pub async fn invalidate_change(&self, change_id: &str) -> usize {
        self.inner.change_cache.invalidate(change_id);
        let change_matcher = ChangePattern::change(change_id);
        let files_matcher = FilesPattern::change(change_id);
        let (changes, files, comments) = tokio::join!(
            self.inner.changes.invalidate(&change_matcher),
            self.inner.files.invalidate(&files_matcher),
            self.inner.comments.invalidate(change_id),
        );
        tracing::debug!(change_id, changes, files, comments, "change invalidated");
        changes + files + comments
    }

    pub async fn invalidate_comments(&self, change_id: &str) -> usize {
        self.inner.comments.invalidate(change_id).await
    }

    /// Refetch every live search.
    pub async fn invalidate_change_lists(&self) -> usize {
        self.inner.change_lists.invalidate(&Matcher::Any).await
    }

    /// Refetch everything and drop both caches.
    pub async fn refresh_all(&self) -> usize {
        self.inner.change_cache.clear();
        let (changes, lists, files, published, drafts) = tokio::join!(
            self.inner.changes.invalidate(&Matcher::Any),
            self.inner.change_lists.invalidate(&Matcher::Any),
            self.inner.files.invalidate(&Matcher::Any),
            self.inner.comments.published.invalidate(&Matcher::Any),
            self.inner.comments.drafts.invalidate(&Matcher::Any),
        );
        changes + lists + files + published + drafts
    }

    /// Remove abandoned listeners and entries from every manager.
    pub fn collect_garbage(&self) -> usize {
        self.inner.changes.collect_garbage()
            + self.inner.change_lists.collect_garbage()
            + self.inner.files.collect_garbage()
            + self.inner.comments.published.collect_garbage()
            + self.inner.comments.drafts.collect_garbage()
    }

    // ---------- Mutations ----------

    fn require_api(&self) -> Result<&GerritApi, GerritError> {
        self.api()
            .ok_or_else(|| GerritError::Config("no Gerrit connection configured".to_string()))
    }

    /// Create a draft and refresh the change's comments.
    pub async fn create_draft(
        &self,
        change_id: &str,
        revision: &str,
        input: &CommentInput,
    ) -> Result<GerritComment, GerritError> {
        let info = self.require_api()?.create_draft(change_id, revision, input).await?;
        self.invalidate_comments(change_id).await;
        Ok(GerritComment::from_info(change_id, &input.path, info, CommentKind::Draft))
    }

    pub async fn update_draft(
        &self,
        draft: &GerritComment,
        revision: &str,
        input: &CommentInput,
    ) -> Result<GerritComment, GerritError> {
        let info = self
            .require_api()?
            .update_draft(&draft.change_id, revision, draft.id(), input)
            .await?;
        self.invalidate_comments(&draft.change_id).await;
        Ok(GerritComment::from_info(&draft.change_id, &draft.path, info, CommentKind::Draft))
    }

    /// Delete a draft. The comment list is refetched rather than edited
    /// locally, since thread order depends on server timestamps.
    pub async fn delete_draft(&self, draft: &GerritComment, revision: &str) -> Result<(), GerritError> {
        self.require_api()?
            .delete_draft(&draft.change_id, revision, draft.id())
            .await?;
        self.invalidate_comments(&draft.change_id).await;
        Ok(())
    }

    /// Post a review and refresh the change and its comments.
    pub async fn publish_review(
        &self,
        change_id: &str,
        revision: &str,
        input: &ReviewInput,
    ) -> Result<(), GerritError> {
        self.require_api()?.set_review(change_id, revision, input).await?;
        self.invalidate_change(change_id).await;
        Ok(())
    }
}

async fn fetch_change(
    weak: Weak<SessionInner>,
    change_id: String,
    with: WithValues,
) -> Option<Arc<GerritChange>> {
    let inner = weak.upgrade()?;
    let info = inner.api.as_ref()?.get_change(&change_id, &with).await?;
    let change = Arc::new(GerritChange::from_info(info, with.clone()));
    inner.change_cache.set(&change_id, &with, Arc::clone(&change));
    Some(change)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::api::QueryParams;
    use crate::api::WithValue::{
        AllCommits, AllRevisions, CurrentFiles, CurrentRevision, DetailedAccounts, DetailedLabels,
        Labels,
    };
    use crate::api::tests::{api_with, change_json};
    use crate::api::types::FileStatus;
    use crate::entity::{FetchContext, RevisionDescriptor};
    use crate::http::{HttpMethod, MockTransport};
    use crate::subscriptions::{SubscribeOptions, listener};

    fn change_url(transport: &MockTransport, id: &str, with: &WithValues) -> String {
        let mut query = QueryParams::new();
        query.with_values(with);
        api_with(transport)
            .endpoint_url(&["changes", id], &query)
            .expect("url")
            .to_string()
    }

    fn files_url(transport: &MockTransport, id: &str, revision: &str, base: Option<u32>) -> String {
        let mut query = QueryParams::new();
        if let Some(base) = base {
            query.push("base", base.to_string());
        }
        api_with(transport)
            .endpoint_url(&["changes", id, "revisions", revision, "files", ""], &query)
            .expect("url")
            .to_string()
    }

    fn revision_json(number: u32, uploader: &str, extra: &str) -> String {
        format!(
            r#"{{"_number":{number},"created":"2024-01-01 00:00:00.000000000",
            "uploader":{uploader},"ref":"refs/changes/42/42/{number}"{extra}}}"#
        )
    }

    /// Change 42 whose current revision is `abc`, carrying `revisions`.
    fn change_with_revisions(revisions: &str) -> String {
        change_json(42, "revisions").replacen(
            "\"owner\"",
            &format!(r#""current_revision":"abc","revisions":{{{revisions}}},"owner""#),
            1,
        )
    }

    fn two_patchsets(older_extra: &str) -> String {
        change_with_revisions(&format!(
            r#""abc":{},"old":{}"#,
            revision_json(2, r#"{"_account_id":1}"#, ""),
            revision_json(1, r#"{"_account_id":7}"#, older_extra)
        ))
    }

    fn paths(files: &[GerritFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    fn labelled_change_json() -> String {
        change_json(42, "labelled").replacen(
            "\"owner\"",
            r#""labels":{"Code-Review":{"approved":{"_account_id":2}}},"owner""#,
            1,
        )
    }

    #[tokio::test]
    async fn test_get_change_uses_cache_for_subset_requests() {
        let transport = MockTransport::new();
        let rich = WithValues::from([Labels, CurrentRevision]);
        transport.push_json(HttpMethod::Get, change_url(&transport, "42", &rich), &change_json(42, "x"));
        let session = GerritSession::new(Some(api_with(&transport)));

        let first = session.get_change("42", &rich).await.expect("change");
        let second = session
            .get_change("42", &WithValues::from([Labels]))
            .await
            .expect("cached");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.count(HttpMethod::Get), 1);
    }

    #[tokio::test]
    async fn test_lazy_labels_fetch_once_and_fill_slot() {
        let transport = MockTransport::new();
        transport.push_json(HttpMethod::Get, change_url(&transport, "42", &WithValues::new()), &change_json(42, "x"));
        let session = GerritSession::new(Some(api_with(&transport)));
        let ctx = FetchContext::new();

        let change = session.get_change("42", &WithValues::new()).await.expect("change");
        // Lazy fields are looked up by the change's triplet id.
        let triplet = change.id().to_string();
        transport.push_json(
            HttpMethod::Get,
            change_url(&transport, &triplet, &WithValues::from([Labels])),
            &labelled_change_json(),
        );

        let labels = change.labels(&session, &ctx).await.expect("labels");
        assert!(labels.contains_key("Code-Review"));
        let again = change.labels(&session, &ctx).await.expect("labels");
        assert_eq!(labels, again);
        assert_eq!(transport.count(HttpMethod::Get), 2);
    }

    #[tokio::test]
    async fn test_lazy_field_without_server_data_does_not_loop() {
        let transport = MockTransport::new();
        transport.push_json(HttpMethod::Get, change_url(&transport, "42", &WithValues::new()), &change_json(42, "x"));
        let session = GerritSession::new(Some(api_with(&transport)));
        let change = session.get_change("42", &WithValues::new()).await.expect("change");
        let triplet = change.id().to_string();
        // The server ignores the expansion and sends no labels.
        transport.push_json(
            HttpMethod::Get,
            change_url(&transport, &triplet, &WithValues::from([Labels, DetailedLabels])),
            &change_json(42, "x"),
        );

        let labels = change.detailed_labels(&session, &FetchContext::new()).await;
        assert!(labels.is_none());
        assert_eq!(transport.count(HttpMethod::Get), 2);
    }

    #[tokio::test]
    async fn test_lazy_fields_are_empty_without_api() {
        let session = GerritSession::new(None);
        let info = serde_json::from_str(&change_json(1, "offline")).expect("info");
        let change = GerritChange::from_info(info, WithValues::new());
        assert!(change.labels(&session, &FetchContext::new()).await.is_none());
        assert!(change.revisions(&session, &FetchContext::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_change_fetcher_notifies_after_invalidation() {
        let transport = MockTransport::new();
        let url = change_url(&transport, "42", &WithValues::new());
        transport.push_json(HttpMethod::Get, &url, &change_json(42, "before"));
        transport.push_json(HttpMethod::Get, &url, &change_json(42, "after"));
        let session = GerritSession::new(Some(api_with(&transport)));

        let fetcher = session.change_fetcher("42", WithValues::new());
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let handler = listener(move |change: &Option<Arc<GerritChange>>| {
            if let Some(change) = change {
                sink.lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(change.subject().to_string());
            }
        });
        fetcher.subscribe(&handler, SubscribeOptions::default()).await;
        assert_eq!(
            fetcher.get_value(false).await.map(|c| c.subject().to_string()),
            Some("before".to_string())
        );

        session.invalidate_change("42").await;
        assert_eq!(
            seen.lock().unwrap_or_else(|e| e.into_inner()).as_slice(),
            &["after".to_string()]
        );
        assert_eq!(
            session
                .change_cache()
                .get("42", &WithValues::new())
                .map(|c| c.subject().to_string()),
            Some("after".to_string())
        );
    }

    #[tokio::test]
    async fn test_change_list_populates_change_cache() {
        let transport = MockTransport::new();
        let session = GerritSession::new(Some(api_with(&transport)));
        let query = ChangeQuery::new(vec![vec!["is:open".to_string()]])
            .with(WithValues::from([AllRevisions]));
        let url = session
            .api()
            .expect("api")
            .endpoint_url(&["changes", ""], &query.to_params())
            .expect("url");
        transport.push_json(
            HttpMethod::Get,
            url.to_string(),
            &format!("[{}, {}]", change_json(1, "a"), change_json(2, "b")),
        );

        let list = session
            .change_list_fetcher(query)
            .get_value(false)
            .await
            .expect("list");
        assert_eq!(list.changes.len(), 2);
        assert!(!list.more);
        let id = list.changes[0].id().to_string();
        assert!(session.change_cache().has(&id, &WithValues::from([AllRevisions])));
    }

    #[tokio::test]
    async fn test_delete_draft_in_read_only_mode_keeps_comments() {
        let transport = MockTransport::new();
        let api = api_with(&transport);
        api.set_read_only(true);
        let session = GerritSession::new(Some(api));
        let draft = GerritComment::from_info(
            "42",
            "a.rs",
            serde_json::from_str(r#"{"id":"d1","message":"x","updated":"2024-01-01 00:00:00.000000000"}"#)
                .expect("comment"),
            CommentKind::Draft,
        );

        let result = session.delete_draft(&draft, "current").await;
        assert!(matches!(result, Err(GerritError::ReadOnly { .. })));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_files_fetcher_diffs_against_base_patchset() {
        let transport = MockTransport::new();
        transport.push_json(
            HttpMethod::Get,
            files_url(&transport, "I42", "abc", Some(1)),
            r#"{"src/lib.rs":{"lines_inserted":3},"old.rs":{"status":"D"}}"#,
        );
        let session = GerritSession::new(Some(api_with(&transport)));
        let base = RevisionDescriptor::new("def", 1);
        let key = FilesKey::new("I42", RevisionDescriptor::new("abc", 2), Some(base.clone()));

        let files = session.files("demo", key).await.expect("files");

        assert_eq!(paths(&files), ["old.rs", "src/lib.rs"]);
        assert!(files.iter().all(|f| f.base.as_ref() == Some(&base)));
        assert!(files.iter().all(|f| f.project == "demo"));
        assert_eq!(files[0].status(), FileStatus::Deleted);
        assert_eq!(files[1].info.lines_inserted, 3);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with("/files/?base=1"));
    }

    #[tokio::test]
    async fn test_revision_files_for_current_and_older_patchsets() {
        let transport = MockTransport::new();
        let all = WithValues::from([AllRevisions]);
        transport.push_json(HttpMethod::Get, change_url(&transport, "42", &all), &two_patchsets(""));
        let session = GerritSession::new(Some(api_with(&transport)));
        let ctx = FetchContext::new();
        let change = session.get_change("42", &all).await.expect("change");
        let triplet = change.id().to_string();
        let older = change.revision("old", &session, &ctx).await.expect("older");
        let current = change.revision("abc", &session, &ctx).await.expect("current");
        assert!(!older.is_current());
        assert!(current.is_current());

        // Older patchsets go through the files endpoint of their own sha.
        transport.push_json(
            HttpMethod::Get,
            files_url(&transport, &triplet, "old", None),
            r#"{"a.rs":{}}"#,
        );
        let files = older.files(&session, &ctx).await.expect("older files");
        assert_eq!(paths(&files), ["a.rs"]);
        assert_eq!(files[0].revision, RevisionDescriptor::new("old", 1));
        assert_eq!(files[0].base, None);

        // The current one refetches the change with its files expanded.
        transport.push_json(
            HttpMethod::Get,
            change_url(&transport, &triplet, &WithValues::from([CurrentRevision, CurrentFiles])),
            &change_with_revisions(&format!(
                r#""abc":{}"#,
                revision_json(2, r#"{"_account_id":1}"#, r#","files":{"b.rs":{},"c.rs":{}}"#)
            )),
        );
        let files = current.files(&session, &ctx).await.expect("current files");
        assert_eq!(paths(&files), ["b.rs", "c.rs"]);

        let sent = transport.count(HttpMethod::Get);
        assert_eq!(current.files(&session, &ctx).await.map(|f| f.len()), Some(2));
        assert_eq!(older.files(&session, &ctx).await.map(|f| f.len()), Some(1));
        assert_eq!(transport.count(HttpMethod::Get), sent, "both slots are filled");
    }

    #[tokio::test]
    async fn test_older_revision_commit_and_detailed_uploader() {
        let transport = MockTransport::new();
        let all = WithValues::from([AllRevisions]);
        transport.push_json(HttpMethod::Get, change_url(&transport, "42", &all), &two_patchsets(""));
        let session = GerritSession::new(Some(api_with(&transport)));
        let ctx = FetchContext::new();
        let change = session.get_change("42", &all).await.expect("change");
        let triplet = change.id().to_string();
        let older = change.revision("old", &session, &ctx).await.expect("older");
        assert!(!older.uploader().is_detailed());

        transport.push_json(
            HttpMethod::Get,
            change_url(&transport, &triplet, &WithValues::from([AllRevisions, AllCommits])),
            &two_patchsets(
                r#","commit":{"parents":[{"commit":"p0"}],
                "author":{"name":"Ann","email":"ann@example.com","date":"2024-01-01 00:00:00.000000000"},
                "committer":{"name":"Ann","email":"ann@example.com","date":"2024-01-01 00:00:00.000000000"},
                "subject":"Older attempt","message":"Older attempt\n\nChange-Id: I42\n"}"#,
            ),
        );
        let commit = older.commit(&session, &ctx).await.expect("commit");
        assert_eq!(commit.sha, "old");
        assert_eq!(commit.subject, "Older attempt");
        assert_eq!(commit.parents, vec!["p0".to_string()]);

        transport.push_json(
            HttpMethod::Get,
            change_url(&transport, &triplet, &WithValues::from([AllRevisions, DetailedAccounts])),
            &change_with_revisions(&format!(
                r#""abc":{},"old":{}"#,
                revision_json(2, r#"{"_account_id":1}"#, ""),
                revision_json(1, r#"{"_account_id":7,"name":"Ann Reviewer"}"#, "")
            )),
        );
        let uploader = older
            .detailed_uploader(&session, &ctx)
            .await
            .expect("uploader");
        assert!(uploader.is_detailed());
        assert_eq!(uploader.display_name(), "Ann Reviewer");
        assert_eq!(transport.count(HttpMethod::Get), 3);
    }
}
