//! Query-string building blocks: expansion flags, filter groups, pagination.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Optional payload expansion sent to Gerrit as `o=<FLAG>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithValue {
    Labels,
    DetailedLabels,
    DetailedAccounts,
    CurrentRevision,
    AllRevisions,
    CurrentCommit,
    AllCommits,
    CurrentFiles,
    Messages,
}

impl WithValue {
    /// All flags, in wire order.
    pub const ALL: [WithValue; 9] = [
        WithValue::Labels,
        WithValue::DetailedLabels,
        WithValue::DetailedAccounts,
        WithValue::CurrentRevision,
        WithValue::AllRevisions,
        WithValue::CurrentCommit,
        WithValue::AllCommits,
        WithValue::CurrentFiles,
        WithValue::Messages,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WithValue::Labels => "LABELS",
            WithValue::DetailedLabels => "DETAILED_LABELS",
            WithValue::DetailedAccounts => "DETAILED_ACCOUNTS",
            WithValue::CurrentRevision => "CURRENT_REVISION",
            WithValue::AllRevisions => "ALL_REVISIONS",
            WithValue::CurrentCommit => "CURRENT_COMMIT",
            WithValue::AllCommits => "ALL_COMMITS",
            WithValue::CurrentFiles => "CURRENT_FILES",
            WithValue::Messages => "MESSAGES",
        }
    }

    /// Parse a flag name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|w| w.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for WithValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of expansion flags attached to a fetched entity.
///
/// Backed by an ordered set so that equal sets always serialize to the same
/// query string regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WithValues(BTreeSet<WithValue>);

impl WithValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, value: WithValue) -> bool {
        self.0.contains(&value)
    }

    /// Whether every flag of `requested` is present in `self`.
    #[must_use]
    pub fn satisfies(&self, requested: &WithValues) -> bool {
        self.0.is_superset(&requested.0)
    }

    #[must_use]
    pub fn union(&self, other: &WithValues) -> WithValues {
        WithValues(self.0.union(&other.0).copied().collect())
    }

    pub fn insert(&mut self, value: WithValue) -> bool {
        self.0.insert(value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = WithValue> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<WithValue> for WithValues {
    fn from_iter<I: IntoIterator<Item = WithValue>>(iter: I) -> Self {
        WithValues(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[WithValue; N]> for WithValues {
    fn from(values: [WithValue; N]) -> Self {
        values.into_iter().collect()
    }
}

impl fmt::Display for WithValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(WithValue::as_str).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Normalize OR-of-AND filter groups so semantically equal queries compare
/// equal: each inner group is sorted, then the outer list is sorted.
#[must_use]
pub fn normalize_filters(groups: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = groups
        .into_iter()
        .map(|mut group| {
            group.sort();
            group
        })
        .collect();
    groups.sort();
    groups
}

/// A paged change search.
///
/// Filters are normalized on construction, so two queries naming the same
/// groups in a different order are equal and hash the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeQuery {
    filters: Vec<Vec<String>>,
    pub offset: u32,
    pub count: u32,
    pub with: WithValues,
    pub query: Option<String>,
}

impl ChangeQuery {
    /// Default page size.
    pub const PAGE_SIZE: u32 = 25;

    #[must_use]
    pub fn new(filters: Vec<Vec<String>>) -> Self {
        Self {
            filters: normalize_filters(filters),
            offset: 0,
            count: Self::PAGE_SIZE,
            with: WithValues::new(),
            query: None,
        }
    }

    #[must_use]
    pub fn page(mut self, offset: u32, count: u32) -> Self {
        self.offset = offset;
        self.count = count;
        self
    }

    #[must_use]
    pub fn with(mut self, with: WithValues) -> Self {
        self.with = with;
        self
    }

    #[must_use]
    pub fn text(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = if query.trim().is_empty() {
            None
        } else {
            Some(query)
        };
        self
    }

    #[must_use]
    pub fn filters(&self) -> &[Vec<String>] {
        &self.filters
    }

    #[must_use]
    pub fn to_params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        params
            .filters(&self.filters, self.query.as_deref())
            .page(self.offset, self.count)
            .with_values(&self.with);
        params
    }
}

/// Ordered query parameters.
///
/// Repeated keys are allowed (`o`, `q`) and keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.push((key.into(), value.into()));
        self
    }

    /// Add one `o=` parameter per flag.
    pub fn with_values(&mut self, with: &WithValues) -> &mut Self {
        for flag in with.iter() {
            self.push("o", flag.as_str());
        }
        self
    }

    /// Add one `q=` parameter per filter group (terms joined by spaces). A
    /// free-text query is appended to every group, or sent alone when there
    /// are no groups.
    pub fn filters(&mut self, groups: &[Vec<String>], query: Option<&str>) -> &mut Self {
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        if groups.is_empty() {
            if let Some(query) = query {
                self.push("q", query);
            }
            return self;
        }
        for group in groups {
            let mut terms: Vec<&str> = group.iter().map(String::as_str).collect();
            if let Some(query) = query {
                terms.push(query);
            }
            self.push("q", terms.join(" "));
        }
        self
    }

    /// Add `n` (count) and `S` (start offset).
    pub fn page(&mut self, offset: u32, count: u32) -> &mut Self {
        self.push("n", count.to_string());
        self.push("S", offset.to_string());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|g| g.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_normalize_filters_ignores_group_and_term_order() {
        let a = normalize_filters(groups(&[&["B", "A"], &["D", "C"]]));
        let b = normalize_filters(groups(&[&["A", "B"], &["C", "D"]]));
        let c = normalize_filters(groups(&[&["C", "D"], &["B", "A"]]));
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a, groups(&[&["A", "B"], &["C", "D"]]));
    }

    #[test]
    fn test_with_values_superset_satisfaction() {
        let stored = WithValues::from([
            WithValue::Labels,
            WithValue::DetailedAccounts,
            WithValue::CurrentRevision,
        ]);
        assert!(stored.satisfies(&WithValues::from([WithValue::Labels])));
        assert!(stored.satisfies(&WithValues::new()));
        assert!(stored.satisfies(&WithValues::from([
            WithValue::Labels,
            WithValue::CurrentRevision
        ])));
        assert!(!stored.satisfies(&WithValues::from([WithValue::CurrentFiles])));
        assert!(!stored.satisfies(&WithValues::from([
            WithValue::Labels,
            WithValue::CurrentFiles
        ])));
    }

    #[test]
    fn test_with_values_iterate_in_stable_order() {
        let a = WithValues::from([WithValue::CurrentRevision, WithValue::Labels]);
        let b = WithValues::from([WithValue::Labels, WithValue::CurrentRevision]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{LABELS,CURRENT_REVISION}");
    }

    #[test]
    fn test_with_value_parse() {
        assert_eq!(WithValue::parse("labels"), Some(WithValue::Labels));
        assert_eq!(
            WithValue::parse(" CURRENT_FILES "),
            Some(WithValue::CurrentFiles)
        );
        assert_eq!(WithValue::parse("nope"), None);
    }

    #[test]
    fn test_query_params_filters_and_page() {
        let mut params = QueryParams::new();
        params
            .filters(&groups(&[&["is:open", "owner:self"], &["reviewer:self"]]), Some("foo"))
            .page(25, 25)
            .with_values(&WithValues::from([WithValue::Labels]));

        let collected: Vec<(&str, &str)> = params.iter().collect();
        assert_eq!(
            collected,
            vec![
                ("q", "is:open owner:self foo"),
                ("q", "reviewer:self foo"),
                ("n", "25"),
                ("S", "25"),
                ("o", "LABELS"),
            ]
        );
    }

    #[test]
    fn test_change_query_equality_is_order_insensitive() {
        let a = ChangeQuery::new(groups(&[&["B", "A"], &["D", "C"]])).page(0, 25);
        let b = ChangeQuery::new(groups(&[&["C", "D"], &["A", "B"]])).page(0, 25);
        assert_eq!(a, b);
        assert_ne!(a, b.clone().page(25, 25));
        assert_ne!(a, a.clone().text("foo"));
        assert_eq!(a, a.clone().text("  "));
    }

    #[test]
    fn test_query_params_free_text_only() {
        let mut params = QueryParams::new();
        params.filters(&[], Some("  status:merged "));
        let collected: Vec<(&str, &str)> = params.iter().collect();
        assert_eq!(collected, vec![("q", "status:merged")]);

        let mut empty = QueryParams::new();
        empty.filters(&[], Some("   "));
        assert!(empty.is_empty());
    }
}
