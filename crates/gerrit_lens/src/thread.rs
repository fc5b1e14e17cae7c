//! Comment threads.
//!
//! A thread is a reply chain: a root comment (no `in_reply_to`) and every
//! comment that transitively replies to it, ordered by update time. The last
//! comment decides whether the thread is resolved.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::api::GerritError;
use crate::api::types::CommentInput;
use crate::entity::{CommentMap, GerritComment};
use crate::session::GerritSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentThread {
    pub path: String,
    /// Oldest first. Never empty.
    pub comments: Vec<GerritComment>,
}

impl CommentThread {
    #[must_use]
    pub fn root(&self) -> Option<&GerritComment> {
        self.comments.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&GerritComment> {
        self.comments.last()
    }

    /// Resolved when the last comment is not marked unresolved.
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.last().is_some_and(|c| !c.unresolved())
    }

    #[must_use]
    pub fn has_draft(&self) -> bool {
        self.comments.iter().any(GerritComment::is_draft)
    }

    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.root().and_then(GerritComment::line)
    }

    /// Append a reply created on the server.
    pub fn push_reply(&mut self, comment: GerritComment) {
        self.comments.push(comment);
    }

    /// Body for a reply to the last comment, anchored where the root is.
    #[must_use]
    pub fn reply_input(&self, message: &str, unresolved: bool) -> CommentInput {
        let root = self.root();
        CommentInput {
            id: None,
            path: self.path.clone(),
            side: root.map(GerritComment::side),
            line: root.and_then(GerritComment::line),
            range: root.and_then(GerritComment::range),
            in_reply_to: self.last().map(|c| c.id().to_string()),
            message: message.to_string(),
            unresolved: Some(unresolved),
        }
    }

    /// Create a draft reply and append it. Resolution follows the new last
    /// comment.
    pub async fn reply(
        &mut self,
        session: &GerritSession,
        revision: &str,
        message: &str,
        unresolved: bool,
    ) -> Result<(), GerritError> {
        let Some(change_id) = self.root().map(|c| c.change_id.clone()) else {
            return Ok(());
        };
        let input = self.reply_input(message, unresolved);
        let comment = session.create_draft(&change_id, revision, &input).await?;
        self.push_reply(comment);
        Ok(())
    }

    /// Delete the trailing draft, if any. The thread is not edited locally;
    /// the session refetches the change's comments and threads must be
    /// rebuilt from the refreshed map.
    pub async fn delete_last_draft(
        &self,
        session: &GerritSession,
        revision: &str,
    ) -> Result<bool, GerritError> {
        match self.last() {
            Some(last) if last.is_draft() => {
                session.delete_draft(last, revision).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Group a flat comment list into threads, ordered by their root's update
/// time. Replies to unknown comments start their own thread.
#[must_use]
pub fn build_threads(path: &str, comments: &[GerritComment]) -> Vec<CommentThread> {
    let by_id: HashMap<&str, &GerritComment> = comments.iter().map(|c| (c.id(), c)).collect();

    let root_of = |comment: &GerritComment| -> String {
        let mut current = comment;
        let mut seen = HashSet::new();
        while let Some(parent) = current.in_reply_to().and_then(|id| by_id.get(id))
            && seen.insert(current.id())
        {
            current = parent;
        }
        current.id().to_string()
    };

    let mut grouped: BTreeMap<String, Vec<GerritComment>> = BTreeMap::new();
    for comment in comments {
        grouped.entry(root_of(comment)).or_default().push(comment.clone());
    }

    let mut threads: Vec<CommentThread> = grouped
        .into_values()
        .map(|mut chain| {
            chain.sort_by_key(GerritComment::updated);
            CommentThread {
                path: path.to_string(),
                comments: chain,
            }
        })
        .collect();
    threads.sort_by_key(|t| t.root().map(GerritComment::updated));
    threads
}

/// Threads of every path of a comment map.
#[must_use]
pub fn threads_by_path(map: &CommentMap) -> BTreeMap<String, Vec<CommentThread>> {
    map.iter()
        .map(|(path, comments)| (path.clone(), build_threads(path, comments)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{CommentInfo, timestamp};
    use crate::entity::CommentKind;

    fn comment(id: &str, reply_to: Option<&str>, unresolved: bool, updated: &str) -> GerritComment {
        GerritComment::from_info(
            "42",
            "a.rs",
            CommentInfo {
                id: id.to_string(),
                path: None,
                side: None,
                parent: None,
                line: Some(10),
                range: None,
                in_reply_to: reply_to.map(str::to_string),
                message: format!("comment {id}"),
                updated: timestamp::parse(updated).expect("timestamp"),
                author: None,
                unresolved,
                patch_set: Some(1),
                commit_id: None,
            },
            CommentKind::Published,
        )
    }

    const T0: &str = "2024-01-01 00:00:00.000000000";
    const T1: &str = "2024-01-01 01:00:00.000000000";
    const T2: &str = "2024-01-01 02:00:00.000000000";

    #[test]
    fn test_reply_resolves_thread() {
        let threads = build_threads(
            "a.rs",
            &[comment("2", Some("1"), false, T1), comment("1", None, true, T0)],
        );
        assert_eq!(threads.len(), 1);
        let ids: Vec<_> = threads[0].comments.iter().map(GerritComment::id).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(threads[0].resolved());
    }

    #[test]
    fn test_nested_replies_join_root_thread() {
        let threads = build_threads(
            "a.rs",
            &[
                comment("1", None, true, T0),
                comment("3", Some("2"), true, T2),
                comment("2", Some("1"), false, T1),
                comment("4", None, false, T1),
            ],
        );
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].comments.len(), 3);
        assert!(!threads[0].resolved());
        assert_eq!(threads[1].root().map(GerritComment::id), Some("4"));
    }

    #[test]
    fn test_reply_to_missing_comment_is_its_own_root() {
        let threads = build_threads("a.rs", &[comment("9", Some("gone"), true, T0)]);
        assert_eq!(threads.len(), 1);
        assert!(!threads[0].resolved());
    }

    #[test]
    fn test_push_reply_recomputes_resolution() {
        let mut thread = build_threads("a.rs", &[comment("1", None, true, T0)]).remove(0);
        assert!(!thread.resolved());

        let input = thread.reply_input("done", false);
        assert_eq!(input.in_reply_to.as_deref(), Some("1"));
        assert_eq!(input.line, Some(10));

        thread.push_reply(comment("2", Some("1"), false, T1));
        assert!(thread.resolved());
    }
}
