//! Quick checkout: park local work, check out a change, come back later.
//!
//! Each checkout stashes uncommitted work, fetches the change's current
//! patchset into a detached HEAD and records an entry in workspace storage.
//! A checkout that fails puts the stash back and records nothing.
//! Popping an entry returns to the original branch and restores the stash.
//! The recorded entries are exposed as a live subscription.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{FetchContext, GerritChange};
use crate::git::GitRepo;
use crate::host::{ContextPublisher, ContextValue, KeyValueStore, StorageScope, StoreError};
use crate::process::CommandError;
use crate::session::GerritSession;
use crate::subscriptions::{Fetcher, Matcher, SubscriptionKey, SubscriptionManager, getter};

/// Workspace storage key of the entry list.
pub const STORAGE_KEY: &str = "quick_checkout.entries";

/// Context flag published while any entry exists.
pub const CONTEXT_FLAG: &str = "gerrit.hasQuickCheckout";

#[derive(Debug, Error)]
pub enum QuickCheckoutError {
    #[error("Git error: {0}")]
    Git(#[from] CommandError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Change {0} has no fetchable current revision")]
    NoRevision(u64),

    #[error("Already on a quick checkout of change {0}")]
    AlreadyCheckedOut(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickCheckoutEntry {
    pub change_number: u64,
    pub change_id: String,
    pub subject: String,
    pub patchset: u32,
    /// Branch (or sha, when detached) to return to.
    pub original_ref: String,
    /// Message of the stash holding parked work, if anything was stashed.
    pub stash_message: Option<String>,
    pub created: DateTime<Utc>,
}

/// The entry list has a single instance; every key is equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QuickCheckoutKey;

impl SubscriptionKey for QuickCheckoutKey {
    type Pattern = ();

    fn satisfies(&self, _requested: &Self) -> bool {
        true
    }

    fn matches(&self, _pattern: &()) -> bool {
        true
    }
}

pub type QuickCheckoutSubscriptions = SubscriptionManager<Vec<QuickCheckoutEntry>, QuickCheckoutKey>;

pub struct QuickCheckout {
    git: GitRepo,
    store: Arc<dyn KeyValueStore>,
    context: Option<Arc<dyn ContextPublisher>>,
    manager: QuickCheckoutSubscriptions,
}

impl QuickCheckout {
    #[must_use]
    pub fn new(git: GitRepo, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            git,
            store,
            context: None,
            manager: QuickCheckoutSubscriptions::new("quick_checkout"),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Arc<dyn ContextPublisher>) -> Self {
        self.context = Some(context);
        self
    }

    /// Recorded entries, oldest first. Unreadable storage reads as empty.
    #[must_use]
    pub fn entries(&self) -> Vec<QuickCheckoutEntry> {
        read_entries(self.store.as_ref())
    }

    /// Live view of the entry list.
    #[must_use]
    pub fn fetcher(&self) -> Fetcher<Vec<QuickCheckoutEntry>, QuickCheckoutKey> {
        let store = Arc::clone(&self.store);
        self.manager.create_fetcher(
            QuickCheckoutKey,
            getter(move || {
                let store = Arc::clone(&store);
                async move { Some(read_entries(store.as_ref())) }
            }),
        )
    }

    fn save(&self, entries: &[QuickCheckoutEntry]) -> Result<(), QuickCheckoutError> {
        let value = serde_json::to_value(entries).map_err(StoreError::from)?;
        self.store.set(StorageScope::Workspace, STORAGE_KEY, value)?;
        if let Some(context) = &self.context {
            context.set_context(CONTEXT_FLAG, ContextValue::Bool(!entries.is_empty()));
        }
        Ok(())
    }

    async fn changed(&self) {
        self.manager.invalidate(&Matcher::Any).await;
    }

    /// Park local work and check out the current patchset of `change`.
    pub async fn push(
        &self,
        session: &GerritSession,
        change: &GerritChange,
    ) -> Result<QuickCheckoutEntry, QuickCheckoutError> {
        let mut entries = self.entries();
        if entries.iter().any(|e| e.change_number == change.number()) {
            return Err(QuickCheckoutError::AlreadyCheckedOut(change.number()));
        }

        let revision = change
            .current_revision(session, &FetchContext::new())
            .await
            .ok_or(QuickCheckoutError::NoRevision(change.number()))?;
        let (url, git_ref) = revision
            .fetch_url()
            .ok_or(QuickCheckoutError::NoRevision(change.number()))?;

        let original_ref = match self.git.current_branch().await? {
            Some(branch) => branch,
            None => self.git.head_sha().await?,
        };
        let stash_message = if self.git.is_dirty().await? {
            let message = format!("gerrit-lens quick checkout of change {}", change.number());
            self.git.stash_push(&message).await?;
            Some(message)
        } else {
            None
        };

        if let Err(err) = self.switch_to(url, git_ref).await {
            // Put parked work back before reporting; nothing is recorded.
            if let Some(message) = &stash_message
                && let Err(restore) = self.restore_stash(message).await
            {
                tracing::warn!(error = %restore, "could not restore stash after failed checkout");
            }
            return Err(err.into());
        }

        let entry = QuickCheckoutEntry {
            change_number: change.number(),
            change_id: change.change_id().to_string(),
            subject: change.subject().to_string(),
            patchset: revision.number(),
            original_ref,
            stash_message,
            created: Utc::now(),
        };
        entries.push(entry.clone());
        self.save(&entries)?;
        tracing::info!(change = entry.change_number, patchset = entry.patchset, "quick checkout");
        self.changed().await;
        Ok(entry)
    }

    /// Return to the entry's original ref and restore its stash. The entry
    /// is only forgotten once both succeeded, so a failed pop can be retried.
    pub async fn pop(&self, change_number: u64) -> Result<Option<QuickCheckoutEntry>, QuickCheckoutError> {
        let Some(entry) = self.find(change_number) else {
            return Ok(None);
        };
        self.git.checkout(&entry.original_ref).await?;
        if let Some(message) = &entry.stash_message {
            self.restore_stash(message).await?;
        }
        self.forget(change_number)?;
        tracing::info!(change = change_number, original_ref = %entry.original_ref, "quick checkout popped");
        self.changed().await;
        Ok(Some(entry))
    }

    /// Forget an entry and drop its stash without checking anything out.
    pub async fn drop_entry(&self, change_number: u64) -> Result<Option<QuickCheckoutEntry>, QuickCheckoutError> {
        let Some(entry) = self.find(change_number) else {
            return Ok(None);
        };
        if let Some(message) = &entry.stash_message
            && let Some(reference) = self.git.find_stash(message).await?
        {
            self.git.stash_drop(&reference).await?;
        }
        self.forget(change_number)?;
        self.changed().await;
        Ok(Some(entry))
    }

    async fn switch_to(&self, url: &str, git_ref: &str) -> Result<(), CommandError> {
        self.git.fetch(url, git_ref).await?;
        self.git.checkout("FETCH_HEAD").await
    }

    async fn restore_stash(&self, message: &str) -> Result<(), CommandError> {
        if let Some(reference) = self.git.find_stash(message).await? {
            self.git.stash_pop(&reference).await?;
        }
        Ok(())
    }

    fn find(&self, change_number: u64) -> Option<QuickCheckoutEntry> {
        self.entries()
            .into_iter()
            .find(|e| e.change_number == change_number)
    }

    fn forget(&self, change_number: u64) -> Result<(), QuickCheckoutError> {
        let mut entries = self.entries();
        entries.retain(|e| e.change_number != change_number);
        self.save(&entries)
    }
}

fn read_entries(store: &dyn KeyValueStore) -> Vec<QuickCheckoutEntry> {
    let Some(value) = store.get(StorageScope::Workspace, STORAGE_KEY) else {
        return Vec::new();
    };
    serde_json::from_value(value).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "ignoring unreadable quick checkout entries");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WithValues;
    use crate::host::{MemoryContext, MemoryStore};
    use crate::process::{CommandOutput, ExitKind, ScriptedRunner};
    use crate::subscriptions::Subscribable;

    fn change_with_revision() -> GerritChange {
        let json = r#"{"id":"demo~main~Iabc","project":"demo","branch":"main",
            "change_id":"Iabc","subject":"Fix it","status":"NEW",
            "created":"2024-01-01 00:00:00.000000000","updated":"2024-01-01 00:00:00.000000000",
            "_number":42,"owner":{"_account_id":1},
            "current_revision":"abc123",
            "revisions":{"abc123":{"_number":3,"created":"2024-01-01 00:00:00.000000000",
                "uploader":{"_account_id":1},"ref":"refs/changes/42/42/3",
                "fetch":{"http":{"url":"https://review.example.com/demo","ref":"refs/changes/42/42/3"}}}}}"#;
        let info = serde_json::from_str(json).expect("change");
        GerritChange::from_info(info, WithValues::from([crate::api::WithValue::CurrentRevision]))
    }

    #[tokio::test]
    async fn test_push_stashes_dirty_tree_and_pop_restores() {
        let runner = ScriptedRunner::new();
        runner.push("git rev-parse --abbrev-ref HEAD", CommandOutput::success("feature\n"));
        runner.push("git status --porcelain", CommandOutput::success(" M src/lib.rs\n"));
        runner.push(
            "git stash list --format=%gd%x1f%gs",
            CommandOutput::success(
                "stash@{0}\u{1f}On feature: gerrit-lens quick checkout of change 42\n",
            ),
        );
        let store = Arc::new(MemoryStore::new());
        let context = Arc::new(MemoryContext::new());
        let quick = QuickCheckout::new(GitRepo::new(Arc::new(runner.clone()), "/repo"), store)
            .with_context(context.clone());
        let session = GerritSession::new(None);

        let live = quick.fetcher();
        assert_eq!(live.get_value(false).await, Some(Vec::new()));

        let entry = quick
            .push(&session, &change_with_revision())
            .await
            .expect("push");
        assert_eq!(entry.patchset, 3);
        assert_eq!(entry.original_ref, "feature");
        assert!(entry.stash_message.is_some());
        assert_eq!(context.get(CONTEXT_FLAG), Some(ContextValue::Bool(true)));
        assert_eq!(live.get_value(false).await.map(|e| e.len()), Some(1));

        let popped = quick.pop(42).await.expect("pop").expect("entry");
        assert_eq!(popped.change_number, 42);
        assert!(quick.entries().is_empty());
        assert_eq!(context.get(CONTEXT_FLAG), Some(ContextValue::Bool(false)));

        let invocations = runner.invocations();
        assert!(invocations.contains(&"git fetch https://review.example.com/demo refs/changes/42/42/3".to_string()));
        assert!(invocations.contains(&"git checkout FETCH_HEAD".to_string()));
        assert!(invocations.contains(&"git checkout feature".to_string()));
        assert!(invocations.contains(&"git stash pop stash@{0}".to_string()));
    }

    fn failure(stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit: ExitKind::Code(1),
        }
    }

    #[tokio::test]
    async fn test_failed_pop_keeps_the_entry_for_a_retry() {
        let runner = ScriptedRunner::new();
        runner.push("git rev-parse --abbrev-ref HEAD", CommandOutput::success("feature\n"));
        runner.push(
            "git checkout feature",
            failure("error: your local changes would be overwritten"),
        );
        let quick = QuickCheckout::new(
            GitRepo::new(Arc::new(runner.clone()), "/repo"),
            Arc::new(MemoryStore::new()),
        );
        let session = GerritSession::new(None);
        quick.push(&session, &change_with_revision()).await.expect("push");

        assert!(matches!(quick.pop(42).await, Err(QuickCheckoutError::Git(_))));
        assert_eq!(quick.entries().len(), 1);

        let popped = quick.pop(42).await.expect("retry").expect("entry");
        assert_eq!(popped.original_ref, "feature");
        assert!(quick.entries().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_restores_stash_and_records_nothing() {
        let runner = ScriptedRunner::new();
        runner.push("git rev-parse --abbrev-ref HEAD", CommandOutput::success("feature\n"));
        runner.push("git status --porcelain", CommandOutput::success(" M src/lib.rs\n"));
        runner.push(
            "git fetch https://review.example.com/demo refs/changes/42/42/3",
            failure("fatal: couldn't find remote ref"),
        );
        runner.push(
            "git stash list --format=%gd%x1f%gs",
            CommandOutput::success(
                "stash@{0}\u{1f}On feature: gerrit-lens quick checkout of change 42\n",
            ),
        );
        let context = Arc::new(MemoryContext::new());
        let quick = QuickCheckout::new(
            GitRepo::new(Arc::new(runner.clone()), "/repo"),
            Arc::new(MemoryStore::new()),
        )
        .with_context(context.clone());
        let session = GerritSession::new(None);

        let result = quick.push(&session, &change_with_revision()).await;

        assert!(matches!(result, Err(QuickCheckoutError::Git(_))));
        assert!(quick.entries().is_empty());
        assert_eq!(context.get(CONTEXT_FLAG), None);
        let invocations = runner.invocations();
        assert!(invocations.contains(&"git stash pop stash@{0}".to_string()));
        assert!(!invocations.contains(&"git checkout FETCH_HEAD".to_string()));
    }

    #[tokio::test]
    async fn test_push_twice_for_same_change_is_refused() {
        let runner = ScriptedRunner::new();
        runner.push("git rev-parse --abbrev-ref HEAD", CommandOutput::success("main\n"));
        let quick = QuickCheckout::new(
            GitRepo::new(Arc::new(runner), "/repo"),
            Arc::new(MemoryStore::new()),
        );
        let session = GerritSession::new(None);
        let change = change_with_revision();

        quick.push(&session, &change).await.expect("first push");
        assert!(matches!(
            quick.push(&session, &change).await,
            Err(QuickCheckoutError::AlreadyCheckedOut(42))
        ));
    }

    #[tokio::test]
    async fn test_pop_unknown_entry_is_none() {
        let quick = QuickCheckout::new(
            GitRepo::new(Arc::new(ScriptedRunner::new()), "/repo"),
            Arc::new(MemoryStore::new()),
        );
        assert!(quick.pop(7).await.expect("pop").is_none());
    }
}
