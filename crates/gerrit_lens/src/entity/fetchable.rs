//! Lazily fetched entity fields.
//!
//! Entity fields that depend on query expansions start out empty when the
//! entity was parsed without those expansions. Asking for such a field
//! refetches the owning change with the expansions that produce it, reads the
//! field from the richer copy and stores it in the original entity's slot.
//!
//! The refetched copy answers through its own accessor. If the server left
//! the field out anyway, that accessor would request the very same fetch
//! again; a [`FetchContext`] threaded through every nested call tracks the
//! active `(change, expansions)` pairs and cuts such loops short.

use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;

use super::change::GerritChange;
use crate::api::WithValues;
use crate::session::GerritSession;

/// The chain of lazy fetches currently in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchContext {
    active: Vec<(String, WithValues)>,
}

impl FetchContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a fetch of `change_id` with `with`. Returns `None` when a fetch of
    /// the same change with overlapping expansions is already active.
    #[must_use]
    pub fn enter(&self, change_id: &str, with: &WithValues) -> Option<FetchContext> {
        let reentrant = self.active.iter().any(|(active_id, active_with)| {
            active_id == change_id
                && (active_with == with || active_with.iter().any(|flag| with.contains(flag)))
        });
        if reentrant {
            return None;
        }
        let mut active = self.active.clone();
        active.push((change_id.to_string(), with.clone()));
        Some(FetchContext { active })
    }

    /// Number of nested fetches in progress.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.active.len()
    }
}

/// Resolve a lazy field.
///
/// Returns the stored value when the slot is filled. Otherwise fetches
/// `change_id` with `with` through the session, lets `extract` pull the value
/// out of the fetched change and stores it. Without an API, or when the fetch
/// would re-enter itself, the field stays empty.
pub(crate) async fn fetch_field<'a, T, F>(
    slot: &'a OnceLock<T>,
    session: &'a GerritSession,
    ctx: &FetchContext,
    change_id: &str,
    with: WithValues,
    extract: F,
) -> Option<T>
where
    T: Clone,
    F: FnOnce(Arc<GerritChange>, FetchContext) -> BoxFuture<'a, Option<T>>,
{
    if let Some(value) = slot.get() {
        return Some(value.clone());
    }
    if session.api().is_none() {
        tracing::debug!(change_id, "no API configured, lazy field stays empty");
        return None;
    }
    let Some(child) = ctx.enter(change_id, &with) else {
        tracing::debug!(change_id, with = %with, "skipping re-entrant fetch");
        return None;
    };

    let change = session.get_change(change_id, &with).await?;
    let value = extract(change, child).await?;
    Some(slot.get_or_init(|| value).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WithValue::{AllRevisions, CurrentRevision, DetailedLabels, Labels};

    #[test]
    fn test_enter_blocks_overlapping_flags_on_same_change() {
        let root = FetchContext::new();
        let inner = root
            .enter("42", &WithValues::from([Labels, DetailedLabels]))
            .expect("first entry");
        assert_eq!(inner.depth(), 1);

        assert!(inner.enter("42", &WithValues::from([Labels])).is_none());
        assert!(inner.enter("42", &WithValues::from([AllRevisions])).is_some());
        assert!(inner.enter("43", &WithValues::from([Labels])).is_some());
    }

    #[test]
    fn test_enter_blocks_repeated_empty_flags() {
        let root = FetchContext::new();
        let inner = root.enter("42", &WithValues::new()).expect("first entry");
        assert!(inner.enter("42", &WithValues::new()).is_none());
        assert!(inner.enter("42", &WithValues::from([CurrentRevision])).is_some());
    }
}
