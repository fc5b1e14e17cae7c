//! Live comments of a change.
//!
//! Published comments and the caller's drafts come from separate endpoints
//! and live in separate managers; consumers see them joined into a single
//! path → comments map.

use super::base::{Fetcher, Field, Matcher, SubscriptionKey, SubscriptionManager};
use crate::entity::CommentMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommentsKey {
    pub change_id: String,
}

impl CommentsKey {
    #[must_use]
    pub fn new(change_id: impl Into<String>) -> Self {
        Self {
            change_id: change_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentsPattern {
    pub change_id: Field<String>,
}

impl CommentsPattern {
    #[must_use]
    pub fn change(change_id: impl Into<String>) -> Matcher<Self> {
        Matcher::Pattern(Self {
            change_id: Field::Is(change_id.into()),
        })
    }
}

impl SubscriptionKey for CommentsKey {
    type Pattern = CommentsPattern;

    fn satisfies(&self, requested: &Self) -> bool {
        self == requested
    }

    fn matches(&self, pattern: &CommentsPattern) -> bool {
        pattern.change_id.admits(&self.change_id)
    }
}

pub type CommentSubscriptions = SubscriptionManager<CommentMap, CommentsKey>;
pub type CommentsFetcher = Fetcher<CommentMap, CommentsKey>;

/// The published and draft managers of a session.
#[derive(Clone)]
pub struct CommentManagers {
    pub published: CommentSubscriptions,
    pub drafts: CommentSubscriptions,
}

impl CommentManagers {
    #[must_use]
    pub fn new(refetch_interval: Option<std::time::Duration>) -> Self {
        Self {
            published: CommentSubscriptions::with_refetch_interval("comments", refetch_interval),
            drafts: CommentSubscriptions::with_refetch_interval("drafts", refetch_interval),
        }
    }

    /// Refetch both comment kinds of one change.
    pub async fn invalidate(&self, change_id: &str) -> usize {
        let matcher = CommentsPattern::change(change_id);
        let (published, drafts) = tokio::join!(
            self.published.invalidate(&matcher),
            self.drafts.invalidate(&matcher)
        );
        published + drafts
    }
}
