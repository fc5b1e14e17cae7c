//! Keyed, de-duplicated, invalidatable asynchronous values.
//!
//! A [`SubscriptionManager`] owns one entry per distinct key. Each entry holds
//! the getter that produces its value, the latest resolved value, any
//! in-flight fetch, and the listeners of every subscriber attached to it.
//!
//! Listeners are held as [`Weak`] references: a consumer keeps its
//! `Arc<Listener<V>>` alive for as long as it wants notifications. A
//! [`Fetcher`] is the subscriber handle; dropping it unsubscribes, and the
//! entry disappears once its last subscriber is gone.
//!
//! Notification rules:
//! - the first fetch of an entry notifies only listeners registered with
//!   `on_initial`;
//! - every later fetch notifies all listeners, but only if the new value
//!   differs from the previous one.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use tokio::time::Instant;

/// A change callback. `None` means the getter produced no value.
pub type Listener<V> = dyn Fn(&Option<V>) + Send + Sync;

/// Produces a fresh value for an entry.
pub type Getter<V> = Arc<dyn Fn() -> BoxFuture<'static, Option<V>> + Send + Sync>;

/// A value that may still be loading. Cloning shares the same fetch.
pub type ValueFuture<V> = Shared<BoxFuture<'static, Option<V>>>;

/// Wrap a closure as a listener.
pub fn listener<V, F>(f: F) -> Arc<Listener<V>>
where
    F: Fn(&Option<V>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as a getter.
pub fn getter<V, F, Fut>(f: F) -> Getter<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<V>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        SubscriberId(NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Fetch state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Never fetched.
    Initial,
    /// A fetch is in flight.
    Fetching,
    /// A value is available.
    Fetched,
    /// Invalidated; a refetch is being scheduled.
    NotFetched,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Remove the listener after it fires once.
    pub once: bool,
    /// Also fire for the entry's first value (or immediately, if it already
    /// has one).
    pub on_initial: bool,
}

/// Selects entries for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher<P> {
    /// Every entry.
    Any,
    /// Entries whose key matches the pattern.
    Pattern(P),
}

impl<P> Matcher<P> {
    pub fn admits<K>(&self, key: &K) -> bool
    where
        K: SubscriptionKey<Pattern = P>,
    {
        match self {
            Matcher::Any => true,
            Matcher::Pattern(pattern) => key.matches(pattern),
        }
    }
}

/// A pattern field that is either a wildcard or an exact value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Field<T> {
    #[default]
    Any,
    Is(T),
}

impl<T: PartialEq> Field<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Field::Any => true,
            Field::Is(expected) => expected == value,
        }
    }
}

/// Key of a subscription entry.
pub trait SubscriptionKey: Clone + Debug + Send + Sync + 'static {
    /// Partial key used to select entries for invalidation.
    type Pattern: Send + Sync;

    /// Whether an entry stored under `self` can serve a request for
    /// `requested`.
    fn satisfies(&self, requested: &Self) -> bool;

    fn matches(&self, pattern: &Self::Pattern) -> bool;
}

struct ListenerSlot<V> {
    handler: Weak<Listener<V>>,
    once: bool,
    pending_initial: bool,
}

struct Entry<V, K> {
    key: K,
    getter: Getter<V>,
    subscribers: BTreeMap<SubscriberId, Vec<ListenerSlot<V>>>,
    state: FetchState,
    pending: Option<ValueFuture<V>>,
    /// `Some` once any fetch has resolved.
    value: Option<Option<V>>,
    last_fetched: Option<Instant>,
    /// Bumped by every fetch; completions of older fetches are discarded.
    generation: u64,
}

impl<V, K> Entry<V, K> {
    fn new(key: K, getter: Getter<V>) -> Self {
        Self {
            key,
            getter,
            subscribers: BTreeMap::new(),
            state: FetchState::Initial,
            pending: None,
            value: None,
            last_fetched: None,
            generation: 0,
        }
    }

    /// Drop dead listeners. Returns subscribers whose listeners all died.
    fn prune_dead(&mut self) -> Vec<SubscriberId> {
        let mut abandoned = Vec::new();
        for (id, slots) in self.subscribers.iter_mut() {
            let before = slots.len();
            slots.retain(|slot| slot.handler.strong_count() > 0);
            if before > 0 && slots.is_empty() {
                abandoned.push(*id);
            }
        }
        abandoned
    }
}

struct State<V, K> {
    next_entry: u64,
    entries: BTreeMap<u64, Entry<V, K>>,
    owners: HashMap<SubscriberId, u64>,
}

impl<V, K: SubscriptionKey> State<V, K> {
    /// Entry of subscriber `id`, joining or creating one for `key` if needed.
    fn attach(&mut self, id: SubscriberId, key: &K, getter: &Getter<V>) -> u64 {
        if let Some(&entry_id) = self.owners.get(&id)
            && self.entries.contains_key(&entry_id)
        {
            return entry_id;
        }

        let existing = self
            .entries
            .iter()
            .find(|(_, entry)| entry.key.satisfies(key))
            .map(|(entry_id, _)| *entry_id);
        let entry_id = match existing {
            Some(entry_id) => entry_id,
            None => {
                let entry_id = self.next_entry;
                self.next_entry += 1;
                self.entries
                    .insert(entry_id, Entry::new(key.clone(), Arc::clone(getter)));
                entry_id
            }
        };
        if let Some(entry) = self.entries.get_mut(&entry_id) {
            entry.subscribers.entry(id).or_default();
        }
        self.owners.insert(id, entry_id);
        entry_id
    }
}

impl<V, K> State<V, K> {
    fn remove_subscribers(&mut self, entry_id: u64, ids: &[SubscriberId]) {
        for id in ids {
            self.owners.remove(id);
        }
        let empty = match self.entries.get_mut(&entry_id) {
            Some(entry) => {
                for id in ids {
                    entry.subscribers.remove(id);
                }
                entry.subscribers.is_empty()
            }
            None => false,
        };
        if empty {
            self.entries.remove(&entry_id);
        }
    }
}

struct ManagerInner<V, K> {
    name: &'static str,
    refetch_interval: Option<Duration>,
    state: Mutex<State<V, K>>,
}

impl<V, K> ManagerInner<V, K>
where
    V: Clone + PartialEq + Send + Sync + 'static,
    K: SubscriptionKey,
{
    fn lock(&self) -> MutexGuard<'_, State<V, K>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stale(&self, entry: &Entry<V, K>) -> bool {
        matches!(entry.value, Some(None))
            && self.refetch_interval.is_some_and(|interval| {
                entry
                    .last_fetched
                    .is_some_and(|at| at.elapsed() >= interval)
            })
    }

    fn start_fetch(self: &Arc<Self>, entry: &mut Entry<V, K>, entry_id: u64) -> ValueFuture<V> {
        entry.generation += 1;
        entry.state = FetchState::Fetching;
        let generation = entry.generation;
        let getter = Arc::clone(&entry.getter);
        let weak = Arc::downgrade(self);

        let fetch = async move {
            let value = getter().await;
            if let Some(inner) = weak.upgrade() {
                inner.complete(entry_id, generation, &value);
            }
            value
        }
        .boxed()
        .shared();

        entry.pending = Some(fetch.clone());
        fetch
    }

    /// Store a fetched value and notify. Runs inside the shared fetch, so the
    /// entry is updated before any awaiter sees the value.
    fn complete(&self, entry_id: u64, generation: u64, value: &Option<V>) {
        let mut fire: Vec<Arc<Listener<V>>> = Vec::new();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(entry) = state.entries.get_mut(&entry_id) else {
                return;
            };
            if entry.generation != generation {
                tracing::debug!(manager = self.name, entry = entry_id, "discarding superseded fetch");
                return;
            }

            let changed = entry
                .value
                .as_ref()
                .is_some_and(|previous| previous != value);
            entry.value = Some(value.clone());
            entry.state = FetchState::Fetched;
            entry.pending = None;
            entry.last_fetched = Some(Instant::now());

            let mut abandoned = Vec::new();
            for (id, slots) in entry.subscribers.iter_mut() {
                let mut dead = 0usize;
                slots.retain_mut(|slot| {
                    let Some(handler) = slot.handler.upgrade() else {
                        dead += 1;
                        return false;
                    };
                    if slot.pending_initial || changed {
                        slot.pending_initial = false;
                        fire.push(handler);
                        !slot.once
                    } else {
                        true
                    }
                });
                if dead > 0 && slots.is_empty() {
                    abandoned.push(*id);
                }
            }

            tracing::debug!(
                manager = self.name,
                entry = entry_id,
                changed,
                notified = fire.len(),
                "fetch completed"
            );
            if !abandoned.is_empty() {
                state.remove_subscribers(entry_id, &abandoned);
            }
        }

        for handler in fire {
            handler(value);
        }
    }

    async fn value_for(
        self: &Arc<Self>,
        id: SubscriberId,
        key: &K,
        getter: &Getter<V>,
        force: bool,
    ) -> Option<V> {
        let fetch = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let entry_id = state.attach(id, key, getter);
            let entry = state.entries.get_mut(&entry_id)?;

            let in_flight = match entry.state {
                FetchState::Fetching => entry.pending.clone(),
                _ => None,
            };
            match in_flight {
                Some(fetch) => fetch,
                None => {
                    if entry.state == FetchState::Fetched && !force && !self.is_stale(entry) {
                        return entry.value.clone().flatten();
                    }
                    self.start_fetch(entry, entry_id)
                }
            }
        };
        fetch.await
    }

    async fn subscribe(
        self: &Arc<Self>,
        id: SubscriberId,
        key: &K,
        getter: &Getter<V>,
        handler: &Arc<Listener<V>>,
        options: SubscribeOptions,
    ) {
        let immediate = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let entry_id = state.attach(id, key, getter);
            let Some(entry) = state.entries.get_mut(&entry_id) else {
                return;
            };
            let fetched = entry.state == FetchState::Fetched;
            let fire_now = options.on_initial && fetched;
            if !(fire_now && options.once) {
                entry
                    .subscribers
                    .entry(id)
                    .or_default()
                    .push(ListenerSlot {
                        handler: Arc::downgrade(handler),
                        once: options.once,
                        pending_initial: options.on_initial && !fetched,
                    });
            }
            fire_now.then(|| entry.value.clone().flatten())
        };

        if let Some(value) = immediate {
            handler(&value);
        }
        self.value_for(id, key, getter, false).await;
    }

    fn try_value(&self, id: SubscriberId, key: &K) -> Option<ValueFuture<V>> {
        let state = self.lock();
        let entry = state
            .owners
            .get(&id)
            .and_then(|entry_id| state.entries.get(entry_id))
            .or_else(|| {
                state
                    .entries
                    .values()
                    .find(|entry| entry.key.satisfies(key) && entry.state != FetchState::Initial)
            })?;
        match entry.state {
            FetchState::Fetched => {
                let value = entry.value.clone().flatten();
                Some(futures::future::ready(value).boxed().shared())
            }
            FetchState::Fetching => entry.pending.clone(),
            FetchState::Initial | FetchState::NotFetched => None,
        }
    }

    async fn invalidate_entry(self: &Arc<Self>, id: SubscriberId, key: &K, getter: &Getter<V>) {
        let fetch = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let entry_id = state.attach(id, key, getter);
            let Some(entry) = state.entries.get_mut(&entry_id) else {
                return;
            };
            if entry.state == FetchState::Initial {
                return;
            }
            entry.state = FetchState::NotFetched;
            self.start_fetch(entry, entry_id)
        };
        fetch.await;
    }

    fn unsubscribe(&self, id: SubscriberId) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(entry_id) = state.owners.get(&id).copied() {
            state.remove_subscribers(entry_id, &[id]);
            if !state.entries.contains_key(&entry_id) {
                tracing::debug!(manager = self.name, entry = entry_id, "entry released");
            }
        }
    }
}

/// Generic subscription manager over values `V` keyed by `K`.
pub struct SubscriptionManager<V, K> {
    inner: Arc<ManagerInner<V, K>>,
}

impl<V, K> Clone for SubscriptionManager<V, K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, K> SubscriptionManager<V, K>
where
    V: Clone + PartialEq + Send + Sync + 'static,
    K: SubscriptionKey,
{
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self::with_refetch_interval(name, None)
    }

    /// `refetch_interval` makes `get_value` retry entries whose last fetch
    /// produced no value once the interval has elapsed.
    #[must_use]
    pub fn with_refetch_interval(name: &'static str, refetch_interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                name,
                refetch_interval,
                state: Mutex::new(State {
                    next_entry: 0,
                    entries: BTreeMap::new(),
                    owners: HashMap::new(),
                }),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Create a subscriber handle for `key`. The handle joins the first
    /// existing entry whose key satisfies `key`, or creates a new entry that
    /// fetches with `getter`.
    pub fn create_fetcher(&self, key: K, getter: Getter<V>) -> Fetcher<V, K> {
        let id = SubscriberId::next();
        self.inner.lock().attach(id, &key, &getter);
        Fetcher {
            inner: Arc::clone(&self.inner),
            id,
            key,
            getter,
        }
    }

    /// Refetch every matching entry that has been fetched before. Subscribers
    /// are notified only where the value changed. Returns the number of
    /// entries refetched.
    pub async fn invalidate(&self, matcher: &Matcher<K::Pattern>) -> usize {
        let fetches: Vec<ValueFuture<V>> = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            state
                .entries
                .iter_mut()
                .filter(|(_, entry)| entry.state != FetchState::Initial && matcher.admits(&entry.key))
                .map(|(entry_id, entry)| {
                    entry.state = FetchState::NotFetched;
                    self.inner.start_fetch(entry, *entry_id)
                })
                .collect()
        };
        let count = fetches.len();
        tracing::debug!(manager = self.inner.name, entries = count, "invalidating");
        join_all(fetches).await;
        count
    }

    /// Remove listeners whose handlers were dropped and entries left without
    /// subscribers. Returns the number of entries removed.
    pub fn collect_garbage(&self) -> usize {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        let abandoned: Vec<(u64, Vec<SubscriberId>)> = state
            .entries
            .iter_mut()
            .map(|(entry_id, entry)| (*entry_id, entry.prune_dead()))
            .filter(|(_, ids)| !ids.is_empty())
            .collect();

        let before = state.entries.len();
        for (entry_id, ids) in abandoned {
            state.remove_subscribers(entry_id, &ids);
        }
        let removed = before - state.entries.len();
        if removed > 0 {
            tracing::debug!(manager = self.inner.name, removed, "collected abandoned entries");
        }
        removed
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// State of the entry stored under exactly `key`, if any.
    #[must_use]
    pub fn fetch_state(&self, key: &K) -> Option<FetchState>
    where
        K: PartialEq,
    {
        self.inner
            .lock()
            .entries
            .values()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.state)
    }
}

/// Consumer-facing view of a live value.
#[async_trait]
pub trait Subscribable<V: Send + Sync + 'static>: Send + Sync {
    /// Register `handler` (held weakly) and make sure a value is fetched.
    async fn subscribe(&self, handler: &Arc<Listener<V>>, options: SubscribeOptions);

    /// Fire `handler` on the next change only.
    async fn subscribe_once(&self, handler: &Arc<Listener<V>>) {
        self.subscribe(
            handler,
            SubscribeOptions {
                once: true,
                on_initial: false,
            },
        )
        .await;
    }

    /// Current value, fetching if needed. `force` always refetches.
    async fn get_value(&self, force: bool) -> Option<V>;

    /// The value if one is loaded or loading, without starting a fetch.
    fn try_get_value(&self) -> Option<BoxFuture<'static, Option<V>>>;

    fn unsubscribe(&self);

    /// Refetch and notify on change.
    async fn invalidate(&self);

    /// Run the getter directly, bypassing the entry.
    async fn fetch_once(&self) -> Option<V>;
}

/// A subscriber handle. Dropping it unsubscribes.
pub struct Fetcher<V, K> {
    inner: Arc<ManagerInner<V, K>>,
    id: SubscriberId,
    key: K,
    getter: Getter<V>,
}

impl<V, K> Fetcher<V, K> {
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }
}

#[async_trait]
impl<V, K> Subscribable<V> for Fetcher<V, K>
where
    V: Clone + PartialEq + Send + Sync + 'static,
    K: SubscriptionKey,
{
    async fn subscribe(&self, handler: &Arc<Listener<V>>, options: SubscribeOptions) {
        self.inner
            .subscribe(self.id, &self.key, &self.getter, handler, options)
            .await;
    }

    async fn get_value(&self, force: bool) -> Option<V> {
        self.inner
            .value_for(self.id, &self.key, &self.getter, force)
            .await
    }

    fn try_get_value(&self) -> Option<BoxFuture<'static, Option<V>>> {
        self.inner
            .try_value(self.id, &self.key)
            .map(FutureExt::boxed)
    }

    fn unsubscribe(&self) {
        self.inner.unsubscribe(self.id);
    }

    async fn invalidate(&self) {
        self.inner
            .invalidate_entry(self.id, &self.key, &self.getter)
            .await;
    }

    async fn fetch_once(&self) -> Option<V> {
        (self.getter)().await
    }
}

impl<V, K> Drop for Fetcher<V, K> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry_id) = state.owners.get(&self.id).copied() {
            state.remove_subscribers(entry_id, &[self.id]);
        }
    }
}
