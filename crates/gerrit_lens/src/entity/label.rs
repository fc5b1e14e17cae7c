//! Review labels and votes.

use std::collections::BTreeMap;

use serde::Serialize;

use super::user::GerritUser;
use crate::api::types::LabelInfo;

/// Summary state of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelStatus {
    Approved,
    Rejected,
    Recommended,
    Disliked,
    Neutral,
}

/// A label in summary form (`LABELS`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GerritLabel {
    pub name: String,
    pub optional: bool,
    pub status: LabelStatus,
    /// The deciding account for non-neutral states.
    pub by: Option<GerritUser>,
}

impl GerritLabel {
    #[must_use]
    pub fn from_info(name: &str, info: &LabelInfo) -> Self {
        let (status, by) = [
            (LabelStatus::Rejected, &info.rejected),
            (LabelStatus::Approved, &info.approved),
            (LabelStatus::Disliked, &info.disliked),
            (LabelStatus::Recommended, &info.recommended),
        ]
        .into_iter()
        .find_map(|(status, account)| account.as_ref().map(|a| (status, Some(GerritUser::from_info(a)))))
        .unwrap_or((LabelStatus::Neutral, None));

        Self {
            name: name.to_string(),
            optional: info.optional,
            status,
            by,
        }
    }
}

/// One account's vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelVote {
    pub user: GerritUser,
    pub value: i32,
}

/// A label with every vote and the allowed values (`DETAILED_LABELS`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailedLabel {
    pub name: String,
    pub votes: Vec<LabelVote>,
    /// Allowed score → description.
    pub values: BTreeMap<i32, String>,
    pub default_value: i32,
}

impl DetailedLabel {
    #[must_use]
    pub fn from_info(name: &str, info: &LabelInfo) -> Self {
        let votes = info
            .all
            .iter()
            .flatten()
            .filter_map(|approval| {
                approval.value.map(|value| LabelVote {
                    user: GerritUser::from_info(&approval.account),
                    value,
                })
            })
            .collect();
        let values = info
            .values
            .iter()
            .flatten()
            .filter_map(|(score, description)| {
                score
                    .trim()
                    .parse::<i32>()
                    .ok()
                    .map(|score| (score, description.clone()))
            })
            .collect();
        Self {
            name: name.to_string(),
            votes,
            values,
            default_value: info.default_value.unwrap_or_default(),
        }
    }

    /// Highest and lowest vote cast, if any.
    #[must_use]
    pub fn range(&self) -> Option<(i32, i32)> {
        let min = self.votes.iter().map(|v| v.value).min()?;
        let max = self.votes.iter().map(|v| v.value).max()?;
        Some((min, max))
    }
}

/// Parse every label of a change into summary form.
pub(crate) fn labels_from(raw: Option<&BTreeMap<String, LabelInfo>>) -> BTreeMap<String, GerritLabel> {
    raw.into_iter()
        .flatten()
        .map(|(name, info)| (name.clone(), GerritLabel::from_info(name, info)))
        .collect()
}

/// Parse every label of a change into detailed form.
pub(crate) fn detailed_labels_from(
    raw: Option<&BTreeMap<String, LabelInfo>>,
) -> BTreeMap<String, DetailedLabel> {
    raw.into_iter()
        .flatten()
        .map(|(name, info)| (name.clone(), DetailedLabel::from_info(name, info)))
        .collect()
}
