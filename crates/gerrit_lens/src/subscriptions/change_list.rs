//! Live change searches.

use std::sync::Arc;

use super::base::{Fetcher, Field, SubscriptionKey, SubscriptionManager};
use crate::api::{ChangeQuery, normalize_filters};
use crate::entity::GerritChange;

/// One page of a live search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeList {
    pub changes: Vec<Arc<GerritChange>>,
    pub more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeListPattern {
    pub filters: Field<Vec<Vec<String>>>,
    pub offset: Field<u32>,
}

impl ChangeListPattern {
    /// Every page of the search over `filters`.
    #[must_use]
    pub fn filters(filters: Vec<Vec<String>>) -> Self {
        Self {
            filters: Field::Is(normalize_filters(filters)),
            offset: Field::Any,
        }
    }
}

/// Searches are only shared when every parameter is identical.
impl SubscriptionKey for ChangeQuery {
    type Pattern = ChangeListPattern;

    fn satisfies(&self, requested: &Self) -> bool {
        self == requested
    }

    fn matches(&self, pattern: &ChangeListPattern) -> bool {
        pattern.filters.admits(&self.filters().to_vec()) && pattern.offset.admits(&self.offset)
    }
}

pub type ChangeListSubscriptions = SubscriptionManager<ChangeList, ChangeQuery>;
pub type ChangeListFetcher = Fetcher<ChangeList, ChangeQuery>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::Matcher;

    #[test]
    fn test_filter_pattern_matches_every_page() {
        let filters = vec![vec!["is:open".to_string(), "owner:self".to_string()]];
        let first = ChangeQuery::new(filters.clone());
        let second = ChangeQuery::new(filters.clone()).page(25, 25);
        let pattern = Matcher::Pattern(ChangeListPattern::filters(vec![vec![
            "owner:self".to_string(),
            "is:open".to_string(),
        ]]));

        assert!(pattern.admits(&first));
        assert!(pattern.admits(&second));
        assert!(!first.satisfies(&second));
        assert!(first.satisfies(&ChangeQuery::new(filters)));
    }
}
