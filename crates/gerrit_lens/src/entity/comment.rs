//! Inline comments and drafts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::user::GerritUser;
use crate::api::types::{CommentInfo, CommentRange, CommentSide};

/// Comments of a change keyed by file path, each list oldest first.
pub type CommentMap = BTreeMap<String, Vec<GerritComment>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    Published,
    Draft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GerritComment {
    pub change_id: String,
    pub path: String,
    pub kind: CommentKind,
    pub info: CommentInfo,
}

impl GerritComment {
    #[must_use]
    pub fn from_info(change_id: &str, path: &str, info: CommentInfo, kind: CommentKind) -> Self {
        Self {
            change_id: change_id.to_string(),
            path: info.path.clone().unwrap_or_else(|| path.to_string()),
            kind,
            info,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.info.id
    }

    #[must_use]
    pub fn is_draft(&self) -> bool {
        self.kind == CommentKind::Draft
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.info.message
    }

    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.info.line
    }

    #[must_use]
    pub fn range(&self) -> Option<CommentRange> {
        self.info.range
    }

    #[must_use]
    pub fn side(&self) -> CommentSide {
        self.info.side.unwrap_or_default()
    }

    #[must_use]
    pub fn updated(&self) -> DateTime<Utc> {
        self.info.updated
    }

    #[must_use]
    pub fn unresolved(&self) -> bool {
        self.info.unresolved
    }

    #[must_use]
    pub fn in_reply_to(&self) -> Option<&str> {
        self.info.in_reply_to.as_deref()
    }

    #[must_use]
    pub fn patch_set(&self) -> Option<u32> {
        self.info.patch_set
    }

    #[must_use]
    pub fn commit_id(&self) -> Option<&str> {
        self.info.commit_id.as_deref()
    }

    #[must_use]
    pub fn author(&self) -> Option<GerritUser> {
        self.info.author.as_ref().map(GerritUser::from_info)
    }
}

/// Wrap a raw path → comments payload, sorting each list by update time.
#[must_use]
pub fn comment_map_from(
    change_id: &str,
    raw: BTreeMap<String, Vec<CommentInfo>>,
    kind: CommentKind,
) -> CommentMap {
    raw.into_iter()
        .map(|(path, infos)| {
            let mut comments: Vec<GerritComment> = infos
                .into_iter()
                .map(|info| GerritComment::from_info(change_id, &path, info, kind))
                .collect();
            comments.sort_by_key(GerritComment::updated);
            (path, comments)
        })
        .collect()
}

/// Merge comment maps path by path, re-sorting each merged list by update
/// time. Returns `None` if any input is missing.
#[must_use]
pub fn merge_comment_maps(maps: &[Option<CommentMap>]) -> Option<CommentMap> {
    let mut merged = CommentMap::new();
    for map in maps {
        for (path, comments) in map.as_ref()? {
            merged
                .entry(path.clone())
                .or_default()
                .extend(comments.iter().cloned());
        }
    }
    for comments in merged.values_mut() {
        comments.sort_by_key(GerritComment::updated);
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::timestamp;

    fn comment(id: &str, updated: &str) -> CommentInfo {
        CommentInfo {
            id: id.to_string(),
            path: None,
            side: None,
            parent: None,
            line: Some(1),
            range: None,
            in_reply_to: None,
            message: format!("comment {id}"),
            updated: timestamp::parse(updated).expect("timestamp"),
            author: None,
            unresolved: false,
            patch_set: Some(1),
            commit_id: None,
        }
    }

    #[test]
    fn test_comment_map_sorts_by_update_time() {
        let raw = BTreeMap::from([(
            "src/lib.rs".to_string(),
            vec![
                comment("b", "2024-01-02 00:00:00.000000000"),
                comment("a", "2024-01-01 00:00:00.000000000"),
            ],
        )]);
        let map = comment_map_from("42", raw, CommentKind::Published);
        let ids: Vec<_> = map["src/lib.rs"].iter().map(GerritComment::id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(map["src/lib.rs"][0].path, "src/lib.rs");
    }

    #[test]
    fn test_merge_interleaves_drafts_and_published() {
        let published = comment_map_from(
            "42",
            BTreeMap::from([(
                "a.rs".to_string(),
                vec![
                    comment("p1", "2024-01-01 00:00:00.000000000"),
                    comment("p2", "2024-01-03 00:00:00.000000000"),
                ],
            )]),
            CommentKind::Published,
        );
        let drafts = comment_map_from(
            "42",
            BTreeMap::from([
                (
                    "a.rs".to_string(),
                    vec![comment("d1", "2024-01-02 00:00:00.000000000")],
                ),
                (
                    "b.rs".to_string(),
                    vec![comment("d2", "2024-01-02 00:00:00.000000000")],
                ),
            ]),
            CommentKind::Draft,
        );

        let merged = merge_comment_maps(&[Some(published.clone()), Some(drafts)]).expect("merged");
        let ids: Vec<_> = merged["a.rs"].iter().map(GerritComment::id).collect();
        assert_eq!(ids, vec!["p1", "d1", "p2"]);
        assert!(merged["b.rs"][0].is_draft());

        assert!(merge_comment_maps(&[Some(published), None]).is_none());
    }
}
