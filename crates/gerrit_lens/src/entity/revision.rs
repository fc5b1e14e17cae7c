//! Patchsets and their commits.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;

use super::fetchable::{FetchContext, fetch_field};
use super::file::GerritFile;
use super::user::GerritUser;
use crate::api::WithValue::{AllCommits, AllRevisions, CurrentCommit, CurrentFiles, CurrentRevision, DetailedAccounts};
use crate::api::WithValues;
use crate::api::types::{CommitInfo, GitPersonInfo, RevisionInfo};
use crate::session::GerritSession;
use crate::subscriptions::FilesKey;

/// Identifies a patchset: its commit sha and its patchset number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RevisionDescriptor {
    pub id: String,
    pub number: u32,
}

impl RevisionDescriptor {
    #[must_use]
    pub fn new(id: impl Into<String>, number: u32) -> Self {
        Self {
            id: id.into(),
            number,
        }
    }
}

/// A commit as reported for a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GerritCommit {
    pub sha: String,
    pub subject: String,
    pub message: String,
    pub parents: Vec<String>,
    pub author: GitPersonInfo,
    pub committer: GitPersonInfo,
}

impl GerritCommit {
    #[must_use]
    pub fn from_info(sha: &str, info: &CommitInfo) -> Self {
        Self {
            sha: info.commit.clone().unwrap_or_else(|| sha.to_string()),
            subject: info.subject.clone(),
            message: info.message.clone(),
            parents: info.parents.iter().map(|p| p.commit.clone()).collect(),
            author: info.author.clone(),
            committer: info.committer.clone(),
        }
    }

    /// The `Change-Id:` trailer of the commit message.
    #[must_use]
    pub fn change_id(&self) -> Option<&str> {
        crate::git::change_id_trailer(&self.message)
    }
}

/// One patchset of a change.
#[derive(Debug)]
pub struct GerritRevision {
    change_id: String,
    project: String,
    id: String,
    info: RevisionInfo,
    is_current: bool,
    files: OnceLock<Vec<GerritFile>>,
    detailed_uploader: OnceLock<GerritUser>,
    commit: OnceLock<GerritCommit>,
}

impl PartialEq for GerritRevision {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.info == other.info && self.is_current == other.is_current
    }
}

impl GerritRevision {
    /// Wrap a revision of `change_id`. Files, commit and a detailed uploader
    /// are filled from the payload when `with` requested them.
    #[must_use]
    pub fn from_info(
        change_id: &str,
        project: &str,
        sha: &str,
        info: RevisionInfo,
        is_current: bool,
        with: &WithValues,
    ) -> Self {
        let revision = Self {
            change_id: change_id.to_string(),
            project: project.to_string(),
            id: sha.to_string(),
            info,
            is_current,
            files: OnceLock::new(),
            detailed_uploader: OnceLock::new(),
            commit: OnceLock::new(),
        };
        if let Some(files) = &revision.info.files {
            let descriptor = revision.descriptor();
            let parsed = files
                .iter()
                .map(|(path, info)| {
                    GerritFile::new(change_id, project, path, info.clone(), descriptor.clone(), None)
                })
                .collect();
            let _ = revision.files.set(parsed);
        }
        if let Some(commit) = &revision.info.commit {
            let _ = revision.commit.set(GerritCommit::from_info(sha, commit));
        }
        if with.contains(DetailedAccounts) {
            let _ = revision
                .detailed_uploader
                .set(GerritUser::from_info(&revision.info.uploader));
        }
        revision
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn change_id(&self) -> &str {
        &self.change_id
    }

    #[must_use]
    pub fn number(&self) -> u32 {
        self.info.number
    }

    #[must_use]
    pub fn descriptor(&self) -> RevisionDescriptor {
        RevisionDescriptor::new(self.id.clone(), self.info.number)
    }

    #[must_use]
    pub fn is_current(&self) -> bool {
        self.is_current
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.info.created
    }

    #[must_use]
    pub fn git_ref(&self) -> &str {
        &self.info.git_ref
    }

    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.info.kind.as_deref()
    }

    #[must_use]
    pub fn uploader(&self) -> GerritUser {
        GerritUser::from_info(&self.info.uploader)
    }

    /// Preferred fetch source: authenticated HTTP, then SSH, then anything.
    #[must_use]
    pub fn fetch_url(&self) -> Option<(&str, &str)> {
        ["http", "ssh", "anonymous http"]
            .iter()
            .find_map(|scheme| self.info.fetch.get(*scheme))
            .or_else(|| self.info.fetch.values().next())
            .map(|fetch| (fetch.url.as_str(), fetch.git_ref.as_str()))
    }

    /// Files changed in this revision against its parent.
    pub fn files<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<Vec<GerritFile>>> {
        async move {
            if let Some(files) = self.files.get() {
                return Some(files.clone());
            }
            if !self.is_current {
                let key = FilesKey::new(&self.change_id, self.descriptor(), None);
                let files = session.files(&self.project, key).await?;
                return Some(self.files.get_or_init(|| files).clone());
            }
            let with = WithValues::from([CurrentRevision, CurrentFiles]);
            fetch_field(&self.files, session, ctx, &self.change_id, with, move |change, child| {
                async move {
                    let revision = change.revision(&self.id, session, &child).await?;
                    revision.files(session, &child).await
                }
                .boxed()
            })
            .await
        }
        .boxed()
    }

    pub fn detailed_uploader<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<GerritUser>> {
        let with = WithValues::from([AllRevisions, DetailedAccounts]);
        fetch_field(&self.detailed_uploader, session, ctx, &self.change_id, with, move |change, child| {
            async move {
                let revision = change.revision(&self.id, session, &child).await?;
                revision.detailed_uploader(session, &child).await
            }
            .boxed()
        })
        .boxed()
    }

    pub fn commit<'a>(
        &'a self,
        session: &'a GerritSession,
        ctx: &'a FetchContext,
    ) -> BoxFuture<'a, Option<GerritCommit>> {
        let with = if self.is_current {
            WithValues::from([CurrentRevision, CurrentCommit])
        } else {
            WithValues::from([AllRevisions, AllCommits])
        };
        fetch_field(&self.commit, session, ctx, &self.change_id, with, move |change, child| {
            async move {
                let revision = change.revision(&self.id, session, &child).await?;
                revision.commit(session, &child).await
            }
            .boxed()
        })
        .boxed()
    }
}
