//! Files of a revision.

use serde::Serialize;

use super::revision::RevisionDescriptor;
use crate::api::types::{FileInfo, FileStatus};
use crate::session::GerritSession;

/// A file touched by a revision, optionally compared against a base patchset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GerritFile {
    pub change_id: String,
    pub project: String,
    pub path: String,
    pub info: FileInfo,
    pub revision: RevisionDescriptor,
    /// The patchset this file is compared against; `None` means the parent
    /// commit.
    pub base: Option<RevisionDescriptor>,
}

impl GerritFile {
    #[must_use]
    pub fn new(
        change_id: &str,
        project: &str,
        path: &str,
        info: FileInfo,
        revision: RevisionDescriptor,
        base: Option<RevisionDescriptor>,
    ) -> Self {
        Self {
            change_id: change_id.to_string(),
            project: project.to_string(),
            path: path.to_string(),
            info,
            revision,
            base,
        }
    }

    #[must_use]
    pub fn status(&self) -> FileStatus {
        self.info.status.unwrap_or_default()
    }

    /// Path of the file on the old side (differs from `path` for renames and
    /// copies).
    #[must_use]
    pub fn old_path(&self) -> &str {
        self.info.old_path.as_deref().unwrap_or(&self.path)
    }

    /// Gerrit's synthetic entries such as `/COMMIT_MSG`.
    #[must_use]
    pub fn is_magic(&self) -> bool {
        self.path.starts_with('/')
    }

    /// Content on the new side. Deleted files have none.
    pub async fn new_content(&self, session: &GerritSession) -> Option<String> {
        if self.status() == FileStatus::Deleted {
            return None;
        }
        session
            .file_content(&self.project, &self.revision.id, &self.path)
            .await
    }

    /// Content on the old side: the base patchset when one is set, otherwise
    /// the revision's first parent. Added files have none.
    pub async fn old_content(&self, session: &GerritSession) -> Option<String> {
        if self.status() == FileStatus::Added {
            return None;
        }
        match &self.base {
            Some(base) => {
                session
                    .file_content(&self.project, &base.id, self.old_path())
                    .await
            }
            None => {
                session
                    .parent_file_content(
                        &self.project,
                        &self.change_id,
                        &self.revision.id,
                        self.old_path(),
                    )
                    .await
            }
        }
    }
}
