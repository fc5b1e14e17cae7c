//! Change cache with superset satisfaction.
//!
//! Entries are stored per change id together with the with-values they were
//! fetched with. A lookup returns the first entry whose flags are a superset of
//! the requested flags, so a richer fetch serves every cheaper request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::api::WithValues;
use crate::entity::GerritChange;

/// Satisfaction-based cache of fetched changes.
pub struct ChangeCache<T = Arc<GerritChange>> {
    entries: Mutex<HashMap<String, Vec<(WithValues, T)>>>,
}

impl<T> Default for ChangeCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> ChangeCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fetched change. An entry stored with exactly the same flags is
    /// replaced in place, keeping its position; a new flag set is appended.
    /// Entries are never duplicated per flag set.
    pub fn set(&self, change_id: &str, with: &WithValues, value: T) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let slot = entries.entry(change_id.to_string()).or_default();
        match slot.iter_mut().find(|(stored, _)| stored == with) {
            Some(existing) => existing.1 = value,
            None => slot.push((with.clone(), value)),
        }
    }

    /// First entry (in insertion order) whose flags satisfy `with`.
    #[must_use]
    pub fn get(&self, change_id: &str, with: &WithValues) -> Option<T> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(change_id)?
            .iter()
            .find(|(stored, _)| stored.satisfies(with))
            .map(|(_, value)| value.clone())
    }

    #[must_use]
    pub fn has(&self, change_id: &str, with: &WithValues) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(change_id)
            .is_some_and(|slot| slot.iter().any(|(stored, _)| stored.satisfies(with)))
    }

    /// Drop every entry of a change.
    pub fn invalidate(&self, change_id: &str) {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(change_id);
        if let Some(slot) = removed {
            tracing::debug!(change_id, entries = slot.len(), "change cache invalidated");
        }
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of stored entries across all changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WithValue::{CurrentFiles, CurrentRevision, DetailedAccounts, Labels};

    #[test]
    fn test_superset_entry_satisfies_subsets() {
        let cache: ChangeCache<&str> = ChangeCache::new();
        cache.set(
            "42",
            &WithValues::from([Labels, DetailedAccounts, CurrentRevision]),
            "rich",
        );

        assert_eq!(cache.get("42", &WithValues::from([Labels])), Some("rich"));
        assert_eq!(cache.get("42", &WithValues::new()), Some("rich"));
        assert_eq!(
            cache.get("42", &WithValues::from([Labels, CurrentRevision])),
            Some("rich")
        );
        assert_eq!(cache.get("42", &WithValues::from([CurrentFiles])), None);
        assert!(!cache.has("42", &WithValues::from([Labels, CurrentFiles])));
        assert!(!cache.has("43", &WithValues::new()));
    }

    #[test]
    fn test_first_satisfying_entry_wins() {
        let cache: ChangeCache<&str> = ChangeCache::new();
        cache.set("42", &WithValues::from([Labels]), "first");
        cache.set("42", &WithValues::from([Labels, CurrentRevision]), "second");

        assert_eq!(cache.get("42", &WithValues::from([Labels])), Some("first"));
        assert_eq!(
            cache.get("42", &WithValues::from([CurrentRevision])),
            Some("second")
        );
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_same_flags_replace_entry() {
        let cache: ChangeCache<&str> = ChangeCache::new();
        cache.set("42", &WithValues::from([Labels]), "old");
        cache.set("42", &WithValues::from([Labels]), "new");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("42", &WithValues::from([Labels])), Some("new"));

        // A refetch keeps its place ahead of richer entries added later.
        cache.set("42", &WithValues::from([Labels, CurrentRevision]), "rich");
        cache.set("42", &WithValues::from([Labels]), "newest");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("42", &WithValues::from([Labels])), Some("newest"));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache: ChangeCache<&str> = ChangeCache::new();
        cache.set("1", &WithValues::new(), "a");
        cache.set("2", &WithValues::new(), "b");

        cache.invalidate("1");
        assert!(!cache.has("1", &WithValues::new()));
        assert!(cache.has("2", &WithValues::new()));

        cache.clear();
        assert!(cache.is_empty());
    }
}
