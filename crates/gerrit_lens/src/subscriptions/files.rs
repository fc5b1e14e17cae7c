//! Live file lists of a revision.

use super::base::{Fetcher, Field, Matcher, SubscriptionKey, SubscriptionManager};
use crate::entity::{GerritFile, RevisionDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilesKey {
    pub change_id: String,
    pub revision: RevisionDescriptor,
    /// Patchset to diff against; `None` diffs against the parent commit.
    pub base: Option<RevisionDescriptor>,
}

impl FilesKey {
    #[must_use]
    pub fn new(
        change_id: impl Into<String>,
        revision: RevisionDescriptor,
        base: Option<RevisionDescriptor>,
    ) -> Self {
        Self {
            change_id: change_id.into(),
            revision,
            base,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesPattern {
    pub change_id: Field<String>,
    pub revision: Field<String>,
}

impl FilesPattern {
    /// Every file list of one change.
    #[must_use]
    pub fn change(change_id: impl Into<String>) -> Matcher<Self> {
        Matcher::Pattern(Self {
            change_id: Field::Is(change_id.into()),
            revision: Field::Any,
        })
    }
}

impl SubscriptionKey for FilesKey {
    type Pattern = FilesPattern;

    fn satisfies(&self, requested: &Self) -> bool {
        self == requested
    }

    fn matches(&self, pattern: &FilesPattern) -> bool {
        pattern.change_id.admits(&self.change_id) && pattern.revision.admits(&self.revision.id)
    }
}

pub type FileSubscriptions = SubscriptionManager<Vec<GerritFile>, FilesKey>;
pub type FilesFetcher = Fetcher<Vec<GerritFile>, FilesKey>;

#[cfg(test)]
mod tests {
    use super::*;

    fn key(change_id: &str, base: Option<u32>) -> FilesKey {
        FilesKey::new(
            change_id,
            RevisionDescriptor::new("abc", 2),
            base.map(|n| RevisionDescriptor::new(format!("base{n}"), n)),
        )
    }

    #[test]
    fn test_keys_differ_by_base_patchset() {
        assert_eq!(key("I1", Some(1)), key("I1", Some(1)));
        assert_ne!(key("I1", None), key("I1", Some(1)));
        assert!(!key("I1", Some(1)).satisfies(&key("I1", None)));
        assert!(key("I1", None).satisfies(&key("I1", None)));
    }

    #[test]
    fn test_change_pattern_matches_every_revision_and_base() {
        let Matcher::Pattern(pattern) = FilesPattern::change("I1") else {
            panic!("expected a pattern");
        };
        assert!(key("I1", None).matches(&pattern));
        assert!(key("I1", Some(1)).matches(&pattern));
        assert!(!key("I2", None).matches(&pattern));

        let one_revision = FilesPattern {
            change_id: Field::Any,
            revision: Field::Is("def".to_string()),
        };
        assert!(!key("I1", None).matches(&one_revision));
    }
}
