//! Gerrit REST wire types.
//!
//! Only the fields the client uses are declared; unknown fields are ignored so
//! newer servers keep working. Maps use `BTreeMap` so equal payloads compare
//! and serialize identically.
//!
//! API docs: https://gerrit-review.googlesource.com/Documentation/rest-api.html

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gerrit timestamps: `"2024-02-21 11:16:36.775000000"`, always UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

    /// Parse a Gerrit timestamp string.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw.trim(), FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Format a timestamp the way Gerrit expects it.
    pub fn format(value: &DateTime<Utc>) -> String {
        value.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => s.serialize_some(&super::format(v)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            match raw {
                None => Ok(None),
                Some(raw) => super::parse(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid timestamp: {raw}"))
                }),
            }
        }
    }
}

/// Change status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeStatus {
    New,
    Merged,
    Abandoned,
}

/// A Gerrit account, in summary or detailed form depending on the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(rename = "_account_id", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avatars: Vec<AvatarInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarInfo {
    pub url: String,
    #[serde(default)]
    pub height: Option<u32>,
}

/// One vote on a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalInfo {
    #[serde(flatten)]
    pub account: AccountInfo,
    #[serde(default)]
    pub value: Option<i32>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

/// Label state. The `all` and `values` fields are only present with
/// `DETAILED_LABELS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<AccountInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<AccountInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended: Option<AccountInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disliked: Option<AccountInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<ApprovalInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, String>>,
}

/// Git identity on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitPersonInfo {
    pub name: String,
    pub email: String,
    #[serde(with = "timestamp")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub tz: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentCommitInfo {
    pub commit: String,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default)]
    pub parents: Vec<ParentCommitInfo>,
    pub author: GitPersonInfo,
    pub committer: GitPersonInfo,
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

/// File status letter: `A`dded, `D`eleted, `R`enamed, `C`opied, `W`ritten
/// (rewritten). Absent means modified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    #[serde(rename = "A")]
    Added,
    #[serde(rename = "D")]
    Deleted,
    #[serde(rename = "R")]
    Renamed,
    #[serde(rename = "C")]
    Copied,
    #[serde(rename = "W")]
    Rewritten,
    #[serde(rename = "M")]
    #[default]
    Modified,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
    #[serde(default)]
    pub binary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    #[serde(default)]
    pub lines_inserted: u32,
    #[serde(default)]
    pub lines_deleted: u32,
    #[serde(default)]
    pub size_delta: i64,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchInfo {
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "_number")]
    pub number: u32,
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
    pub uploader: AccountInfo,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub fetch: BTreeMap<String, FetchInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, FileInfo>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMessageInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AccountInfo>,
    #[serde(with = "timestamp")]
    pub date: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "_revision_number", default)]
    pub revision_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
    pub id: String,
    pub project: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub change_id: String,
    pub subject: String,
    pub status: ChangeStatus,
    #[serde(with = "timestamp")]
    pub created: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated: DateTime<Utc>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub submitted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub insertions: u32,
    #[serde(default)]
    pub deletions: u32,
    #[serde(rename = "_number")]
    pub number: u64,
    pub owner: AccountInfo,
    #[serde(default)]
    pub work_in_progress: bool,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mergeable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, LabelInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revisions: Option<BTreeMap<String, RevisionInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChangeMessageInfo>>,
    /// Set on the last entry of a query page when more results exist.
    #[serde(rename = "_more_changes", default, skip_serializing_if = "Option::is_none")]
    pub more_changes: Option<bool>,
}

/// Side of the diff a comment is attached to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommentSide {
    Parent,
    #[default]
    Revision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRange {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<CommentSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<CommentRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(with = "timestamp")]
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<AccountInfo>,
    #[serde(default)]
    pub unresolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_set: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
}

/// Body for creating or updating a draft comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommentInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<CommentSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<CommentRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<bool>,
}

/// Who gets emailed about a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifyHandling {
    None,
    Owner,
    OwnerReviewers,
    All,
}

/// Body for `POST /changes/{id}/revisions/{rev}/review`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, i32>,
    /// `PUBLISH_ALL_REVISIONS` publishes drafts of every patchset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drafts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyHandling>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_timestamp_parse_nanoseconds() {
        let ts = timestamp::parse("2024-02-21 11:16:36.775000000").expect("parse");
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.hour(), 11);
        assert_eq!(ts.nanosecond(), 775_000_000);
        assert_eq!(timestamp::format(&ts), "2024-02-21 11:16:36.775000000");
        assert!(timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_change_info_deserializes_minimal_payload() {
        let json = r#"{
            "id": "demo~main~I8473b95934b5732ac55d26311a706c9c2bde9940",
            "project": "demo",
            "branch": "main",
            "change_id": "I8473b95934b5732ac55d26311a706c9c2bde9940",
            "subject": "Implement feature",
            "status": "NEW",
            "created": "2024-02-21 11:16:36.775000000",
            "updated": "2024-02-22 09:00:00.000000000",
            "_number": 3965,
            "owner": {"_account_id": 1000096},
            "unknown_field": true
        }"#;
        let change: ChangeInfo = serde_json::from_str(json).expect("change");
        assert_eq!(change.number, 3965);
        assert_eq!(change.status, ChangeStatus::New);
        assert_eq!(change.owner.account_id, Some(1000096));
        assert!(change.labels.is_none());
        assert!(change.revisions.is_none());
        assert_eq!(change.more_changes, None);
    }

    #[test]
    fn test_approval_info_flattens_account() {
        let json = r#"{"_account_id": 7, "name": "Jane", "value": 2, "date": "2024-01-01 00:00:00.000000000"}"#;
        let approval: ApprovalInfo = serde_json::from_str(json).expect("approval");
        assert_eq!(approval.account.name.as_deref(), Some("Jane"));
        assert_eq!(approval.value, Some(2));
        assert!(approval.date.is_some());
    }

    #[test]
    fn test_comment_input_skips_unset_fields() {
        let input = CommentInput {
            path: "src/lib.rs".to_string(),
            line: Some(4),
            message: "nit".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&input).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"path": "src/lib.rs", "line": 4, "message": "nit"})
        );
    }
}
