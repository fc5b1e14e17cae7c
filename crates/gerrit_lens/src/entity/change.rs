//! Changes with lazily fetched expansions.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;

use super::fetchable::{FetchContext, fetch_field};
use super::label::{DetailedLabel, GerritLabel, detailed_labels_from, labels_from};
use super::revision::GerritRevision;
use super::user::GerritUser;
use crate::api::WithValue::{AllRevisions, CurrentRevision, DetailedAccounts, DetailedLabels, Labels};
use crate::api::WithValues;
use crate::api::types::{ChangeInfo, ChangeStatus};
use crate::session::GerritSession;

type RevisionMap = BTreeMap<String, Arc<GerritRevision>>;

/// A change as fetched with a particular set of expansions.
///
/// Fields covered by those expansions are filled at parse time. The others
/// are fetched on first access through the session, and stay empty when no
/// API is configured.
#[derive(Debug)]
pub struct GerritChange {
    info: ChangeInfo,
    with: WithValues,
    labels: OnceLock<BTreeMap<String, GerritLabel>>,
    detailed_labels: OnceLock<BTreeMap<String, DetailedLabel>>,
    detailed_owner: OnceLock<GerritUser>,
    revisions: OnceLock<RevisionMap>,
    current_revision: OnceLock<Arc<GerritRevision>>,
    /// The current revision alone, keyed by sha.
    current_revisions: OnceLock<RevisionMap>,
}

/// Two changes are equal when the server sent the same payload.
impl PartialEq for GerritChange {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info
    }
}

impl GerritChange {
    #[must_use]
    pub fn from_info(info: ChangeInfo, with: WithValues) -> Self {
        let change = Self {
            info,
            with,
            labels: OnceLock::new(),
            detailed_labels: OnceLock::new(),
            detailed_owner: OnceLock::new(),
            revisions: OnceLock::new(),
            current_revision: OnceLock::new(),
            current_revisions: OnceLock::new(),
        };
        let with = &change.with;
        let info = &change.info;

        if info.labels.is_some() && (with.contains(Labels) || with.contains(DetailedLabels)) {
            let _ = change.labels.set(labels_from(info.labels.as_ref()));
        }
        if info.labels.is_some() && with.contains(DetailedLabels) {
            let _ = change
                .detailed_labels
                .set(detailed_labels_from(info.labels.as_ref()));
        }
        if with.contains(DetailedAccounts) {
            let _ = change.detailed_owner.set(GerritUser::from_info(&info.owner));
        }

        let revisions: Option<RevisionMap> = info.revisions.as_ref().map(|revisions| {
            revisions
                .iter()
                .map(|(sha, revision)| {
                    let is_current = info.current_revision.as_deref() == Some(sha.as_str());
                    let parsed = GerritRevision::from_info(
                        &info.id,
                        &info.project,
                        sha,
                        revision.clone(),
                        is_current,
                        with,
                    );
                    (sha.clone(), Arc::new(parsed))
                })
                .collect()
        });
        if let Some(revisions) = revisions {
            if with.contains(CurrentRevision) || with.contains(AllRevisions) {
                change.set_current_from(&revisions);
            }
            if with.contains(AllRevisions) {
                let _ = change.revisions.set(revisions);
            }
        }
        change
    }

    fn set_current_from(&self, revisions: &RevisionMap) {
        let Some(current) = revisions.values().find(|r| r.is_current()) else {
            return;
        };
        let _ = self.current_revision.set(Arc::clone(current));
        let _ = self.current_revisions.set(BTreeMap::from([(
            current.id().to_string(),
            Arc::clone(current),
        )]));
    }

    #[must_use]
    pub fn info(&self) -> &ChangeInfo {
        &self.info
    }

    /// Expansions this change was fetched with.
    #[must_use]
    pub fn with(&self) -> &WithValues {
        &self.with
    }

    /// The `project~branch~Change-Id` triplet used for follow-up requests.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// The `Change-Id` trailer value.
    #[must_use]
    pub fn change_id(&self) -> &str {
        &self.info.change_id
    }

    #[must_use]
    pub fn number(&self) -> u64 {
        self.info.number
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.info.project
    }

    #[must_use]
    pub fn branch(&self) -> &str {
        &self.info.branch
    }

    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.info.topic.as_deref()
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.info.subject
    }

    #[must_use]
    pub fn status(&self) -> ChangeStatus {
        self.info.status
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.info.created
    }

    #[must_use]
    pub fn updated(&self) -> DateTime<Utc> {
        self.info.updated
    }

    #[must_use]
    pub fn insertions(&self) -> u32 {
        self.info.insertions
    }

    #[must_use]
    pub fn deletions(&self) -> u32 {
        self.info.deletions
    }

    #[must_use]
    pub fn work_in_progress(&self) -> bool {
        self.info.work_in_progress
    }

    /// Owner as sent in the payload (summary unless `DETAILED_ACCOUNTS`).
    #[must_use]
    pub fn owner(&self) -> GerritUser {
        GerritUser::from_info(&self.info.owner)
    }

    pub fn labels<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<BTreeMap<String, GerritLabel>>> {
        let with = WithValues::from([Labels]);
        fetch_field(&self.labels, session, ctx, self.id(), with, move |change, child| {
            async move { change.labels(session, &child).await }.boxed()
        })
        .boxed()
    }

    /// Detailed labels. Fetching them also fills the summary labels.
    pub fn detailed_labels<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<BTreeMap<String, DetailedLabel>>> {
        let with = WithValues::from([Labels, DetailedLabels]);
        fetch_field(&self.detailed_labels, session, ctx, self.id(), with, move |change, child| {
            async move {
                if let Some(labels) = change.labels.get() {
                    let _ = self.labels.set(labels.clone());
                }
                change.detailed_labels(session, &child).await
            }
            .boxed()
        })
        .boxed()
    }

    pub fn detailed_owner<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<GerritUser>> {
        let with = WithValues::from([DetailedAccounts]);
        fetch_field(&self.detailed_owner, session, ctx, self.id(), with, move |change, child| {
            async move { change.detailed_owner(session, &child).await }.boxed()
        })
        .boxed()
    }

    /// Every revision. Fetching them also fills the current revision.
    pub fn revisions<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<RevisionMap>> {
        let with = WithValues::from([AllRevisions]);
        fetch_field(&self.revisions, session, ctx, self.id(), with, move |change, child| {
            async move {
                let revisions = change.revisions(session, &child).await?;
                self.set_current_from(&revisions);
                Some(revisions)
            }
            .boxed()
        })
        .boxed()
    }

    pub fn current_revision<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<Arc<GerritRevision>>> {
        let with = WithValues::from([CurrentRevision]);
        fetch_field(&self.current_revision, session, ctx, self.id(), with, move |change, child| {
            async move {
                let current = change.current_revision(session, &child).await?;
                let _ = self.current_revisions.set(BTreeMap::from([(
                    current.id().to_string(),
                    Arc::clone(&current),
                )]));
                Some(current)
            }
            .boxed()
        })
        .boxed()
    }

    /// The current revision alone, keyed by sha.
    pub fn current_revisions<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<RevisionMap>> {
        let with = WithValues::from([CurrentRevision]);
        fetch_field(&self.current_revisions, session, ctx, self.id(), with, move |change, child| {
            async move {
                let revisions = change.current_revisions(session, &child).await?;
                if let Some(current) = revisions.values().next() {
                    let _ = self.current_revision.set(Arc::clone(current));
                }
                Some(revisions)
            }
            .boxed()
        })
        .boxed()
    }

    /// A revision by sha. The current revision is answered without fetching
    /// the others.
    pub fn revision<'a>(
        &'a self,
        sha: &'a str,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<Arc<GerritRevision>>> {
        async move {
            if let Some(current) = self.current_revision.get()
                && current.id() == sha
            {
                return Some(Arc::clone(current));
            }
            if let Some(found) = self.revisions.get().and_then(|r| r.get(sha)) {
                return Some(Arc::clone(found));
            }
            let revisions = self.revisions(session, ctx).await?;
            revisions.get(sha).cloned()
        }
        .boxed()
    }

    /// A revision by patchset number.
    pub async fn revision_by_number(
        &self,
        number: u32,
        session: &GerritSession,
        ctx: &FetchContext,
    ) -> Option<Arc<GerritRevision>> {
        if let Some(current) = self.current_revision.get()
            && current.number() == number
        {
            return Some(Arc::clone(current));
        }
        let revisions = self.revisions(session, ctx).await?;
        revisions.values().find(|r| r.number() == number).cloned()
    }
}
