//! Live single changes.

use std::sync::Arc;

use super::base::{Fetcher, Field, Matcher, SubscriptionKey, SubscriptionManager};
use crate::api::WithValues;
use crate::entity::GerritChange;

/// A change id together with the expansions it is fetched with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeKey {
    pub change_id: String,
    pub with: WithValues,
}

impl ChangeKey {
    #[must_use]
    pub fn new(change_id: impl Into<String>, with: WithValues) -> Self {
        Self {
            change_id: change_id.into(),
            with,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePattern {
    pub change_id: Field<String>,
    pub with: Field<WithValues>,
}

impl ChangePattern {
    /// Every entry of one change, whatever its expansions.
    #[must_use]
    pub fn change(change_id: impl Into<String>) -> Matcher<Self> {
        Matcher::Pattern(Self {
            change_id: Field::Is(change_id.into()),
            with: Field::Any,
        })
    }
}

impl SubscriptionKey for ChangeKey {
    type Pattern = ChangePattern;

    /// A fetch with more expansions serves a request for fewer.
    fn satisfies(&self, requested: &Self) -> bool {
        self.change_id == requested.change_id && self.with.satisfies(&requested.with)
    }

    fn matches(&self, pattern: &ChangePattern) -> bool {
        pattern.change_id.admits(&self.change_id) && pattern.with.admits(&self.with)
    }
}

pub type ChangeSubscriptions = SubscriptionManager<Arc<GerritChange>, ChangeKey>;
pub type ChangeFetcher = Fetcher<Arc<GerritChange>, ChangeKey>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WithValue::{CurrentRevision, Labels};

    #[test]
    fn test_richer_key_satisfies_poorer_request() {
        let rich = ChangeKey::new("42", WithValues::from([Labels, CurrentRevision]));
        let poor = ChangeKey::new("42", WithValues::from([Labels]));
        assert!(rich.satisfies(&poor));
        assert!(!poor.satisfies(&rich));
        assert!(!rich.satisfies(&ChangeKey::new("43", WithValues::new())));
    }

    #[test]
    fn test_change_pattern_ignores_expansions() {
        let key = ChangeKey::new("42", WithValues::from([Labels]));
        assert!(ChangePattern::change("42").admits(&key));
        assert!(!ChangePattern::change("43").admits(&key));
        let exact = Matcher::Pattern(ChangePattern {
            change_id: Field::Any,
            with: Field::Is(WithValues::new()),
        });
        assert!(!exact.admits(&key));
    }
}
