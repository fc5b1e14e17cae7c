//! Derived subscriptions: mapping one source, or joining several.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};

use super::base::{Listener, SubscribeOptions, Subscribable};

/// A target handler paired with the bridge listener registered on the
/// source. The source holds the bridge weakly; it lives as long as this pair.
struct Bridge<V: ?Sized, U: ?Sized> {
    target: Weak<U>,
    _listener: Arc<V>,
}

fn prune<V: ?Sized, U: ?Sized>(bridges: &mut Vec<Bridge<V, U>>) {
    bridges.retain(|bridge| bridge.target.strong_count() > 0);
}

/// A subscription whose values are `mapper` applied to a source's values.
pub struct MappedSubscription<V, U> {
    source: Arc<dyn Subscribable<V>>,
    mapper: Arc<dyn Fn(&Option<V>) -> Option<U> + Send + Sync>,
    bridges: Mutex<Vec<Bridge<Listener<V>, Listener<U>>>>,
}

/// Derive a subscription by mapping every value of `source`.
pub fn map_subscription<V, U, F>(
    source: Arc<dyn Subscribable<V>>,
    mapper: F,
) -> MappedSubscription<V, U>
where
    V: Send + Sync + 'static,
    U: Send + Sync + 'static,
    F: Fn(&Option<V>) -> Option<U> + Send + Sync + 'static,
{
    MappedSubscription {
        source,
        mapper: Arc::new(mapper),
        bridges: Mutex::new(Vec::new()),
    }
}

/// Method form of [`map_subscription`].
pub trait SubscribableExt<V: Send + Sync + 'static> {
    fn map_subscription<U, F>(self, mapper: F) -> MappedSubscription<V, U>
    where
        U: Send + Sync + 'static,
        F: Fn(&Option<V>) -> Option<U> + Send + Sync + 'static;
}

impl<V, S> SubscribableExt<V> for Arc<S>
where
    V: Send + Sync + 'static,
    S: Subscribable<V> + 'static,
{
    fn map_subscription<U, F>(self, mapper: F) -> MappedSubscription<V, U>
    where
        U: Send + Sync + 'static,
        F: Fn(&Option<V>) -> Option<U> + Send + Sync + 'static,
    {
        let source: Arc<dyn Subscribable<V>> = self;
        map_subscription(source, mapper)
    }
}

#[async_trait]
impl<V, U> Subscribable<U> for MappedSubscription<V, U>
where
    V: Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    async fn subscribe(&self, handler: &Arc<Listener<U>>, options: SubscribeOptions) {
        let target = Arc::downgrade(handler);
        let mapper = Arc::clone(&self.mapper);
        let forward = Weak::clone(&target);
        let bridge: Arc<Listener<V>> = Arc::new(move |value: &Option<V>| {
            if let Some(handler) = forward.upgrade() {
                handler(&mapper(value));
            }
        });
        {
            let mut bridges = self.bridges.lock().unwrap_or_else(|e| e.into_inner());
            prune(&mut bridges);
            bridges.push(Bridge {
                target,
                _listener: Arc::clone(&bridge),
            });
        }
        self.source.subscribe(&bridge, options).await;
    }

    async fn get_value(&self, force: bool) -> Option<U> {
        (self.mapper)(&self.source.get_value(force).await)
    }

    fn try_get_value(&self) -> Option<BoxFuture<'static, Option<U>>> {
        let mapper = Arc::clone(&self.mapper);
        self.source
            .try_get_value()
            .map(|pending| pending.map(move |value| mapper(&value)).boxed())
    }

    fn unsubscribe(&self) {
        self.bridges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.source.unsubscribe();
    }

    async fn invalidate(&self) {
        self.source.invalidate().await;
    }

    async fn fetch_once(&self) -> Option<U> {
        (self.mapper)(&self.source.fetch_once().await)
    }
}

type JoinMapper<V, U> = Arc<dyn Fn(&[Option<V>]) -> Option<U> + Send + Sync>;

struct DeliveryState<U> {
    /// Last joined value handed to the target, once there is one.
    last: Option<Option<U>>,
    fired: bool,
}

/// One subscriber of a joined subscription. Deliveries are deduplicated
/// against the last value delivered, so a change reaching the target through
/// several sources (or through a deferred re-derive) fires once.
struct Delivery<U> {
    target: Weak<Listener<U>>,
    once: bool,
    state: Mutex<DeliveryState<U>>,
}

impl<U: Clone + PartialEq> Delivery<U> {
    fn new(target: Weak<Listener<U>>, once: bool) -> Self {
        Self {
            target,
            once,
            state: Mutex::new(DeliveryState {
                last: None,
                fired: false,
            }),
        }
    }

    fn is_live(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Record the baseline value without notifying.
    fn seed(&self, value: &Option<U>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.last.is_none() {
            state.last = Some(value.clone());
        }
    }

    /// Deliver `value` if it differs from the last delivery, or always when
    /// `force` is set.
    fn offer(&self, value: Option<U>, force: bool) {
        let Some(handler) = self.target.upgrade() else {
            return;
        };
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if self.once && state.fired {
                return;
            }
            if !force && state.last.as_ref() == Some(&value) {
                return;
            }
            state.last = Some(value.clone());
            state.fired = true;
        }
        handler(&value);
    }
}

struct JoinedSubscriber<V, U> {
    delivery: Arc<Delivery<U>>,
    /// Registered weakly on the sources; owned here.
    _bridges: Vec<Arc<Listener<V>>>,
}

/// A subscription combining several sources into one value.
pub struct JoinedSubscription<V, U> {
    sources: Arc<Vec<Arc<dyn Subscribable<V>>>>,
    mapper: JoinMapper<V, U>,
    subscribers: Mutex<Vec<JoinedSubscriber<V, U>>>,
}

/// Combine `sources` with `mapper`. The joined value is re-derived whenever
/// any source changes; it is unset while any source is unset.
pub fn join_subscribables<V, U, F>(
    mapper: F,
    sources: Vec<Arc<dyn Subscribable<V>>>,
) -> JoinedSubscription<V, U>
where
    V: Clone + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&[Option<V>]) -> Option<U> + Send + Sync + 'static,
{
    JoinedSubscription {
        sources: Arc::new(sources),
        mapper: Arc::new(mapper),
        subscribers: Mutex::new(Vec::new()),
    }
}

impl<V, U> JoinedSubscription<V, U>
where
    V: Clone + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
{
    /// Listener for source `index`. On a change it re-derives from the other
    /// sources' current values. Siblings still loading are awaited on a
    /// spawned task, since a sibling that resolves unchanged never notifies.
    fn bridge_for(&self, index: usize, delivery: &Arc<Delivery<U>>) -> Arc<Listener<V>> {
        let sources = Arc::clone(&self.sources);
        let mapper = Arc::clone(&self.mapper);
        let delivery = Arc::downgrade(delivery);
        Arc::new(move |changed: &Option<V>| {
            let Some(target) = delivery.upgrade() else {
                return;
            };
            if !target.is_live() {
                return;
            }
            let mut values = Vec::with_capacity(sources.len());
            let mut pending = Vec::new();
            for (i, source) in sources.iter().enumerate() {
                if i == index {
                    values.push(changed.clone());
                    continue;
                }
                let Some(mut current) = source.try_get_value() else {
                    // Never loaded: it notifies once it has a value.
                    return;
                };
                match (&mut current).now_or_never() {
                    Some(value) => values.push(value),
                    None => {
                        values.push(None);
                        pending.push((i, current));
                    }
                }
            }

            if pending.is_empty() {
                target.offer(mapper(&values), false);
                return;
            }
            let mapper = Arc::clone(&mapper);
            let settle = async move {
                let (slots, futures): (Vec<usize>, Vec<_>) = pending.into_iter().unzip();
                for (slot, value) in slots.into_iter().zip(join_all(futures).await) {
                    values[slot] = value;
                }
                target.offer(mapper(&values), false);
            };
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(settle);
                }
                Err(_) => tracing::debug!("no runtime to settle joined value, skipping"),
            }
        })
    }

    fn live_deliveries(&self) -> Vec<Arc<Delivery<U>>> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| s.delivery.is_live());
        subscribers.iter().map(|s| Arc::clone(&s.delivery)).collect()
    }
}

#[async_trait]
impl<V, U> Subscribable<U> for JoinedSubscription<V, U>
where
    V: Clone + Send + Sync + 'static,
    U: Clone + PartialEq + Send + Sync + 'static,
{
    async fn subscribe(&self, handler: &Arc<Listener<U>>, options: SubscribeOptions) {
        let delivery = Arc::new(Delivery::new(Arc::downgrade(handler), options.once));
        let bridges: Vec<Arc<Listener<V>>> = (0..self.sources.len())
            .map(|i| self.bridge_for(i, &delivery))
            .collect();
        {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.retain(|s| s.delivery.is_live());
            subscribers.push(JoinedSubscriber {
                delivery: Arc::clone(&delivery),
                _bridges: bridges.clone(),
            });
        }

        // Sources never see `on_initial`; the joined initial value is
        // delivered once below instead of once per source.
        let source_options = SubscribeOptions {
            once: false,
            on_initial: false,
        };
        join_all(
            self.sources
                .iter()
                .zip(bridges.iter())
                .map(|(source, bridge)| source.subscribe(bridge, source_options)),
        )
        .await;

        let initial = self.get_value(false).await;
        if options.on_initial {
            delivery.offer(initial, true);
        } else {
            delivery.seed(&initial);
        }
    }

    async fn get_value(&self, force: bool) -> Option<U> {
        let values = join_all(self.sources.iter().map(|s| s.get_value(force))).await;
        (self.mapper)(&values)
    }

    fn try_get_value(&self) -> Option<BoxFuture<'static, Option<U>>> {
        let pending: Option<Vec<BoxFuture<'static, Option<V>>>> = self
            .sources
            .iter()
            .map(|source| source.try_get_value())
            .collect();
        let pending = pending?;
        let mapper = Arc::clone(&self.mapper);
        Some(
            async move {
                let values = join_all(pending).await;
                mapper(&values)
            }
            .boxed(),
        )
    }

    fn unsubscribe(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        for source in self.sources.iter() {
            source.unsubscribe();
        }
    }

    /// Refetch every source, then settle the joined value once all of them
    /// have resolved.
    async fn invalidate(&self) {
        join_all(self.sources.iter().map(|s| s.invalidate())).await;
        let deliveries = self.live_deliveries();
        if deliveries.is_empty() {
            return;
        }
        let settled = self.get_value(false).await;
        for delivery in deliveries {
            delivery.offer(settled.clone(), false);
        }
    }

    async fn fetch_once(&self) -> Option<U> {
        let values = join_all(self.sources.iter().map(|s| s.fetch_once())).await;
        (self.mapper)(&values)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::subscriptions::base::tests::{TestKey, cell_getter, recorder};
    use crate::subscriptions::base::{Getter, Matcher, SubscriptionManager, getter};

    fn cell(value: Option<u32>) -> Arc<Mutex<Option<u32>>> {
        Arc::new(Mutex::new(value))
    }

    fn set(cell: &Arc<Mutex<Option<u32>>>, value: Option<u32>) {
        *cell.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    fn sum(values: &[Option<u32>]) -> Option<u32> {
        values.iter().copied().sum()
    }

    /// Getter that always yields `value` after a delay.
    fn slow_getter(value: u32) -> Getter<u32> {
        getter(move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some(value)
        })
    }

    fn seen(log: &Arc<Mutex<Vec<Option<u32>>>>) -> Vec<Option<u32>> {
        log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    #[tokio::test]
    async fn test_mapped_subscription_maps_values_and_notifications() {
        let manager: SubscriptionManager<u32, TestKey> = SubscriptionManager::new("test");
        let value = cell(Some(2));
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = Arc::new(manager.create_fetcher(TestKey("a"), cell_getter(&value, &calls)));
        let doubled = Arc::clone(&fetcher).map_subscription(|v: &Option<u32>| v.map(|n| n * 2));

        assert_eq!(doubled.get_value(false).await, Some(4));

        let (handler, log) = recorder();
        doubled.subscribe(&handler, SubscribeOptions::default()).await;
        set(&value, Some(5));
        doubled.invalidate().await;
        assert_eq!(*log.lock().unwrap_or_else(|e| e.into_inner()), vec![Some(10)]);

        let ready = doubled.try_get_value().expect("set");
        assert_eq!(ready.await, Some(10));
    }

    #[tokio::test]
    async fn test_joined_subscription_rederives_on_any_change() {
        let manager: SubscriptionManager<u32, TestKey> = SubscriptionManager::new("test");
        let (a, b) = (cell(Some(1)), cell(Some(10)));
        let calls = Arc::new(AtomicUsize::new(0));
        let fa: Arc<dyn Subscribable<u32>> =
            Arc::new(manager.create_fetcher(TestKey("a"), cell_getter(&a, &calls)));
        let fb: Arc<dyn Subscribable<u32>> =
            Arc::new(manager.create_fetcher(TestKey("b"), cell_getter(&b, &calls)));
        let joined = join_subscribables(sum, vec![fa, fb]);

        let (handler, log) = recorder();
        joined
            .subscribe(
                &handler,
                SubscribeOptions {
                    once: false,
                    on_initial: true,
                },
            )
            .await;
        assert_eq!(*log.lock().unwrap_or_else(|e| e.into_inner()), vec![Some(11)]);

        set(&b, Some(20));
        manager.invalidate(&Matcher::Pattern("b")).await;
        assert_eq!(
            *log.lock().unwrap_or_else(|e| e.into_inner()),
            vec![Some(11), Some(21)]
        );

        set(&a, Some(2));
        let before = calls.load(std::sync::atomic::Ordering::SeqCst);
        joined.invalidate().await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), before + 2);
        assert_eq!(joined.get_value(false).await, Some(22));
    }

    #[tokio::test]
    async fn test_joined_try_get_value_unset_if_any_source_unset() {
        let manager: SubscriptionManager<u32, TestKey> = SubscriptionManager::new("test");
        let (a, b) = (cell(Some(1)), cell(Some(2)));
        let calls = Arc::new(AtomicUsize::new(0));
        let fa = Arc::new(manager.create_fetcher(TestKey("a"), cell_getter(&a, &calls)));
        let fb = Arc::new(manager.create_fetcher(TestKey("b"), cell_getter(&b, &calls)));
        let joined = join_subscribables(
            sum,
            vec![
                Arc::clone(&fa) as Arc<dyn Subscribable<u32>>,
                Arc::clone(&fb) as Arc<dyn Subscribable<u32>>,
            ],
        );

        fa.get_value(false).await;
        assert!(joined.try_get_value().is_none());

        fb.get_value(false).await;
        let ready = joined.try_get_value().expect("both sources set");
        assert_eq!(ready.await, Some(3));
    }

    #[tokio::test]
    async fn test_joined_unsubscribe_releases_every_source() {
        let manager: SubscriptionManager<u32, TestKey> = SubscriptionManager::new("test");
        let (a, b) = (cell(Some(1)), cell(Some(2)));
        let calls = Arc::new(AtomicUsize::new(0));
        let fa: Arc<dyn Subscribable<u32>> =
            Arc::new(manager.create_fetcher(TestKey("a"), cell_getter(&a, &calls)));
        let fb: Arc<dyn Subscribable<u32>> =
            Arc::new(manager.create_fetcher(TestKey("b"), cell_getter(&b, &calls)));
        let joined = join_subscribables(sum, vec![fa, fb]);
        assert_eq!(joined.get_value(false).await, Some(3));
        assert_eq!(manager.entry_count(), 2);

        joined.unsubscribe();
        assert_eq!(manager.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joined_notifies_when_unchanged_sibling_is_still_loading() {
        let fast: SubscriptionManager<u32, TestKey> = SubscriptionManager::new("fast");
        let slow: SubscriptionManager<u32, TestKey> = SubscriptionManager::new("slow");
        let a = cell(Some(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let fa: Arc<dyn Subscribable<u32>> =
            Arc::new(fast.create_fetcher(TestKey("a"), cell_getter(&a, &calls)));
        let fb: Arc<dyn Subscribable<u32>> =
            Arc::new(slow.create_fetcher(TestKey("b"), slow_getter(10)));
        let joined = join_subscribables(sum, vec![fa, fb]);

        let (handler, log) = recorder();
        joined.subscribe(&handler, SubscribeOptions::default()).await;
        assert!(seen(&log).is_empty());

        // The slow source is mid-refetch when the fast one reports its change,
        // and resolves to the same value, so it never notifies by itself.
        set(&a, Some(2));
        tokio::join!(
            slow.invalidate(&Matcher::Any),
            fast.invalidate(&Matcher::Any)
        );
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(seen(&log), vec![Some(12)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joined_invalidate_delivers_a_change_exactly_once() {
        let manager: SubscriptionManager<u32, TestKey> = SubscriptionManager::new("test");
        let a = cell(Some(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let fa: Arc<dyn Subscribable<u32>> =
            Arc::new(manager.create_fetcher(TestKey("a"), cell_getter(&a, &calls)));
        let fb: Arc<dyn Subscribable<u32>> =
            Arc::new(manager.create_fetcher(TestKey("b"), slow_getter(10)));
        let joined = join_subscribables(sum, vec![fa, fb]);

        let (handler, log) = recorder();
        joined.subscribe(&handler, SubscribeOptions::default()).await;

        set(&a, Some(2));
        joined.invalidate().await;
        assert_eq!(seen(&log), vec![Some(12)]);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(seen(&log), vec![Some(12)], "deferred re-derive is deduplicated");

        // Nothing changed: no notification at all.
        joined.invalidate().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(seen(&log), vec![Some(12)]);
    }

    #[tokio::test]
    async fn test_joined_on_initial_fires_once_for_all_sources() {
        let manager: SubscriptionManager<u32, TestKey> = SubscriptionManager::new("test");
        let (a, b) = (cell(Some(1)), cell(Some(2)));
        let calls = Arc::new(AtomicUsize::new(0));
        let fa: Arc<dyn Subscribable<u32>> =
            Arc::new(manager.create_fetcher(TestKey("a"), cell_getter(&a, &calls)));
        let fb: Arc<dyn Subscribable<u32>> =
            Arc::new(manager.create_fetcher(TestKey("b"), cell_getter(&b, &calls)));
        let joined = join_subscribables(sum, vec![fa, fb]);

        let (handler, log) = recorder();
        joined
            .subscribe(
                &handler,
                SubscribeOptions {
                    once: true,
                    on_initial: true,
                },
            )
            .await;
        set(&a, Some(5));
        manager.invalidate(&Matcher::Any).await;

        assert_eq!(seen(&log), vec![Some(3)]);
    }
}
