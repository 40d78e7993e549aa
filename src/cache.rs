use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::entry::{CacheEntry, EntryState, ErasedValue};
use crate::error::ApiError;
use crate::events::{CacheEvent, EventSink, Listener};
use crate::key::{KeyPattern, ResourceKey};
use crate::policy::{ResourcePolicy, RetryPolicy, run_with_retry};
use crate::polling::{PollDecision, PollingRule};

/// Re-callable, type-erased fetcher stored per key so invalidation and
/// polling can re-fetch without the original caller.
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<ErasedValue, ApiError>> + Send + Sync>;

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchCause {
    Read,
    Invalidation,
    Poll,
    Refetch,
}

struct InFlight {
    cause: FetchCause,
    handle: JoinHandle<()>,
}

struct PollState {
    rule: PollingRule,
    timer: Option<(u64, JoinHandle<()>)>,
}

impl PollState {
    fn cancel_timer(&mut self) {
        if let Some((_, handle)) = self.timer.take() {
            handle.abort();
        }
    }
}

struct Slot {
    state: EntryState,
    fetcher: Option<ErasedFetcher>,
    retry: RetryPolicy,
    /// Latest sequence number issued for this key.
    latest_seq: u64,
    in_flight: Option<InFlight>,
    /// Invalidated while a fetch that started earlier was still running.
    refetch_after: bool,
    listeners: HashMap<u64, Listener>,
    /// Set while the slot has no listeners.
    idle_since: Option<Instant>,
    poll: Option<PollState>,
}

impl Slot {
    fn new(now: Instant) -> Self {
        Slot {
            state: EntryState::default(),
            fetcher: None,
            retry: RetryPolicy::none(),
            latest_seq: 0,
            in_flight: None,
            refetch_after: false,
            listeners: HashMap::new(),
            idle_since: Some(now),
            poll: None,
        }
    }

    fn is_subscribed(&self) -> bool {
        !self.listeners.is_empty()
    }
}

/// Events produced under the lock, delivered after it is released.
#[derive(Default)]
struct Outbox {
    events: Vec<(CacheEvent, Vec<Listener>)>,
}

impl Outbox {
    /// Queue `event` for the sink and, for transitions, the slot's listeners.
    fn push(&mut self, slot: &Slot, event: CacheEvent) {
        let listeners = if event.is_transition() {
            slot.listeners.values().cloned().collect()
        } else {
            Vec::new()
        };
        self.events.push((event, listeners));
    }

    fn push_sink_only(&mut self, event: CacheEvent) {
        self.events.push((event, Vec::new()));
    }

    fn deliver(self, sink: Option<&Arc<dyn EventSink>>) {
        for (event, listeners) in self.events {
            if let Some(sink) = sink {
                sink.emit(&event);
            }
            for listener in listeners {
                listener(&event);
            }
        }
    }
}

pub(crate) struct Inner {
    slots: Mutex<HashMap<ResourceKey, Slot>>,
    next_seq: AtomicU64,
    next_listener_id: AtomicU64,
    sink: Option<Arc<dyn EventSink>>,
    retention: Duration,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<ResourceKey, Slot>> {
        // Transitions never panic half-way, so a poisoned map is still consistent.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Issue a fetch for `key`, superseding any fetch still in flight.
    ///
    /// Returns `None` when no fetcher was ever registered for the key.
    fn start_fetch(
        self: &Arc<Self>,
        key: &ResourceKey,
        slot: &mut Slot,
        cause: FetchCause,
        outbox: &mut Outbox,
    ) -> Option<u64> {
        let fetcher = slot.fetcher.clone()?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = slot.in_flight.take() {
            previous.handle.abort();
        }
        slot.latest_seq = seq;
        slot.state.is_fetching = true;

        let retry = slot.retry;
        let weak = Arc::downgrade(self);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let label = task_key.to_string();
            let result = run_with_retry(&retry, &label, || fetcher()).await;
            if let Some(inner) = weak.upgrade() {
                inner.complete(&task_key, seq, result);
            }
        });
        slot.in_flight = Some(InFlight { cause, handle });
        outbox.push(
            slot,
            CacheEvent::FetchStarted {
                key: key.clone(),
                seq,
            },
        );
        Some(seq)
    }

    /// Apply the result of fetch `seq`. Anything but the latest issued
    /// sequence number for the key is discarded.
    fn complete(self: &Arc<Self>, key: &ResourceKey, seq: u64, result: Result<ErasedValue, ApiError>) {
        let mut outbox = Outbox::default();
        {
            let mut slots = self.slots();
            match slots.get_mut(key) {
                Some(slot) if slot.latest_seq == seq => {
                    self.apply(key, slot, seq, result, &mut outbox);
                }
                _ => {
                    outbox.push_sink_only(CacheEvent::Discarded {
                        key: key.clone(),
                        seq,
                    });
                }
            }
        }
        outbox.deliver(self.sink.as_ref());
    }

    fn apply(
        self: &Arc<Self>,
        key: &ResourceKey,
        slot: &mut Slot,
        seq: u64,
        result: Result<ErasedValue, ApiError>,
        outbox: &mut Outbox,
    ) {
        slot.in_flight = None;
        slot.state.is_fetching = false;

        match result {
            Ok(value) => {
                slot.state.value = Some(value);
                slot.state.fetched_at = Some(Instant::now());
                slot.state.error = None;
                slot.state.invalidated = slot.refetch_after;
                outbox.push(
                    slot,
                    CacheEvent::FetchSucceeded {
                        key: key.clone(),
                        seq,
                    },
                );
            }
            Err(error) => {
                slot.state.error = Some(error.clone());
                outbox.push(
                    slot,
                    CacheEvent::FetchFailed {
                        key: key.clone(),
                        seq,
                        error,
                    },
                );
            }
        }

        if slot.refetch_after {
            slot.refetch_after = false;
            if slot.is_subscribed() {
                self.start_fetch(key, slot, FetchCause::Invalidation, outbox);
                return;
            }
        }
        self.evaluate_poll(key, slot);
    }

    /// Re-arm or stop the polling timer from the current value.
    fn evaluate_poll(self: &Arc<Self>, key: &ResourceKey, slot: &mut Slot) {
        if !slot.is_subscribed() || slot.state.is_fetching {
            return;
        }
        let Some(poll) = slot.poll.as_mut() else {
            return;
        };
        poll.cancel_timer();
        let Some(value) = slot.state.value.as_ref() else {
            return;
        };
        match poll.rule.evaluate(value.as_ref()) {
            PollDecision::Stop => {
                tracing::debug!(target: "hire_query::polling", key = %key, "polling stopped");
                slot.poll = None;
            }
            PollDecision::After(delay) => {
                let timer_id = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
                let handle = spawn_poll_timer(Arc::downgrade(self), key.clone(), timer_id, delay);
                tracing::debug!(
                    target: "hire_query::polling",
                    key = %key,
                    delay_ms = delay.as_millis() as u64,
                    "poll scheduled"
                );
                poll.timer = Some((timer_id, handle));
            }
        }
    }

    fn fire_poll(self: &Arc<Self>, key: &ResourceKey, timer_id: u64) {
        let mut outbox = Outbox::default();
        {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            let Some(poll) = slot.poll.as_mut() else {
                return;
            };
            if !matches!(poll.timer, Some((id, _)) if id == timer_id) {
                return;
            }
            poll.timer = None;
            if slot.is_subscribed() && !slot.state.is_fetching {
                self.start_fetch(key, slot, FetchCause::Poll, &mut outbox);
            }
        }
        outbox.deliver(self.sink.as_ref());
    }

    fn unsubscribe(&self, key: &ResourceKey, listener_id: u64) {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        slot.listeners.remove(&listener_id);
        if slot.listeners.is_empty() {
            slot.idle_since = Some(Instant::now());
            if let Some(mut poll) = slot.poll.take() {
                poll.cancel_timer();
                tracing::debug!(target: "hire_query::polling", key = %key, "polling detached on unsubscribe");
            }
        }
    }
}

fn spawn_poll_timer(inner: Weak<Inner>, key: ResourceKey, timer_id: u64, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(inner) = inner.upgrade() {
            inner.fire_poll(&key, timer_id);
        }
    })
}

/// Keyed store of fetched resources with stale-while-revalidate reads.
///
/// - At most one fetch is in flight per key.
/// - Completions are applied in start order: only the latest issued fetch of
///   a key may store its result.
/// - A failed fetch keeps the last good value and records the error.
/// - Invalidation makes the next read re-fetch, and re-fetches right away
///   when the key has subscribers.
///
/// The cache is a cheap handle (`Clone` over an `Arc`). Methods that start
/// fetches must be called from within a tokio runtime.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<Inner>,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    /// A cache with no event sink and zero retention.
    pub fn new() -> Self {
        Self::with_options(None, Duration::ZERO)
    }

    /// # Arguments
    /// * `sink` - Receives every cache event
    /// * `retention` - How long an unsubscribed entry survives garbage collection
    pub fn with_options(sink: Option<Arc<dyn EventSink>>, retention: Duration) -> Self {
        ResourceCache {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                next_listener_id: AtomicU64::new(0),
                sink,
                retention,
            }),
        }
    }

    /// Return the current entry for `key`, scheduling a fetch when needed.
    ///
    /// A fetch is scheduled when the entry has no value, was invalidated, or
    /// is stale under `policy`, and no fetch is already in flight. The fetcher
    /// is remembered for the key and reused by invalidation and polling.
    pub fn read<V, F, Fut>(&self, key: &ResourceKey, fetcher: F, policy: &ResourcePolicy) -> CacheEntry<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let fetcher: ErasedFetcher = Arc::new(move || {
            let fut = fetcher();
            async move { fut.await.map(|value| Arc::new(value) as ErasedValue) }.boxed()
        });

        let mut outbox = Outbox::default();
        let snapshot = {
            let mut slots = self.inner.slots();
            let now = Instant::now();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot::new(now));
            slot.fetcher = Some(fetcher);
            slot.retry = policy.retry;

            let needs_fetch = !slot.state.is_fetching
                && match slot.state.fetched_at {
                    None => true,
                    Some(fetched_at) => {
                        slot.state.invalidated || policy.staleness.is_stale(fetched_at, now)
                    }
                };
            if needs_fetch {
                self.inner.start_fetch(key, slot, FetchCause::Read, &mut outbox);
            }
            snapshot_or_error(&slot.state, key)
        };
        outbox.deliver(self.inner.sink.as_ref());
        snapshot
    }

    /// Read `key` and wait until no fetch is in flight for it.
    ///
    /// Useful outside a view: the returned entry holds either the fresh value
    /// or the error of the fetch this call triggered or joined.
    pub async fn read_settled<V, F, Fut>(&self, key: &ResourceKey, fetcher: F, policy: &ResourcePolicy) -> CacheEntry<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _subscription = self.subscribe(key, move |event| {
            let _ = tx.send(event.clone());
        });
        let entry = self.read(key, fetcher, policy);
        self.wait_until_idle(key, entry, &mut rx).await
    }

    /// Wait until no fetch is in flight for `key`, without starting one.
    ///
    /// Returns `None` when the key is unknown.
    pub async fn settled<V>(&self, key: &ResourceKey) -> Option<CacheEntry<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.peek::<V>(key)?;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _subscription = self.subscribe(key, move |event| {
            let _ = tx.send(event.clone());
        });
        let entry = self.peek(key)?;
        Some(self.wait_until_idle(key, entry, &mut rx).await)
    }

    async fn wait_until_idle<V>(
        &self,
        key: &ResourceKey,
        mut entry: CacheEntry<V>,
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<CacheEvent>,
    ) -> CacheEntry<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        while entry.is_fetching {
            if rx.recv().await.is_none() {
                break;
            }
            entry = match self.peek(key) {
                Some(entry) => entry,
                None => break,
            };
        }
        entry
    }

    /// Current entry for `key` without triggering a fetch.
    pub fn peek<V>(&self, key: &ResourceKey) -> Option<CacheEntry<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        let slots = self.inner.slots();
        slots.get(key).map(|slot| snapshot_or_error(&slot.state, key))
    }

    /// Mark every entry matching `pattern` as outdated.
    ///
    /// Subscribed entries re-fetch immediately. Invalidations that arrive
    /// while an invalidation-triggered fetch is still running coalesce into
    /// it; an earlier fetch of another cause gets one follow-up fetch.
    ///
    /// Returns the number of entries matched.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let mut outbox = Outbox::default();
        let mut matched = 0;
        {
            let mut slots = self.inner.slots();
            for (key, slot) in slots.iter_mut().filter(|(key, _)| pattern.matches(key)) {
                matched += 1;
                slot.state.invalidated = true;
                outbox.push(slot, CacheEvent::Invalidated { key: key.clone() });

                match slot.in_flight.as_ref().map(|f| f.cause) {
                    Some(FetchCause::Invalidation) => {}
                    Some(_) => slot.refetch_after = true,
                    None if slot.is_subscribed() => {
                        if let Some(poll) = slot.poll.as_mut() {
                            poll.cancel_timer();
                        }
                        self.inner
                            .start_fetch(key, slot, FetchCause::Invalidation, &mut outbox);
                    }
                    None => {}
                }
            }
        }
        outbox.deliver(self.inner.sink.as_ref());
        matched
    }

    /// Force a fetch for `key` even when fresh, superseding an in-flight one.
    ///
    /// Returns `false` when the key was never read, so no fetcher is known.
    pub fn refetch(&self, key: &ResourceKey) -> bool {
        let mut outbox = Outbox::default();
        let started = {
            let mut slots = self.inner.slots();
            match slots.get_mut(key) {
                Some(slot) => {
                    if let Some(poll) = slot.poll.as_mut() {
                        poll.cancel_timer();
                    }
                    self.inner
                        .start_fetch(key, slot, FetchCause::Refetch, &mut outbox)
                        .is_some()
                }
                None => false,
            }
        };
        outbox.deliver(self.inner.sink.as_ref());
        started
    }

    /// Register `listener` for every transition of `key`.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called. Dropping the last
    /// subscription of a key cancels its polling.
    pub fn subscribe<L>(&self, key: &ResourceKey, listener: L) -> Subscription
    where
        L: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut slots = self.inner.slots();
            let slot = slots
                .entry(key.clone())
                .or_insert_with(|| Slot::new(Instant::now()));
            slot.listeners.insert(id, Arc::new(listener));
            slot.idle_since = None;
        }
        Subscription {
            inner: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
            active: true,
        }
    }

    /// Remove unsubscribed, idle entries older than the retention window.
    ///
    /// Entries with a fetch in flight are kept. Returns the number removed.
    pub fn collect_garbage(&self) -> usize {
        let mut outbox = Outbox::default();
        let removed = {
            let mut slots = self.inner.slots();
            let now = Instant::now();
            let retention = self.inner.retention;
            let before = slots.len();
            slots.retain(|key, slot| {
                let expired = !slot.state.is_fetching
                    && slot
                        .idle_since
                        .is_some_and(|since| now.saturating_duration_since(since) >= retention);
                if expired {
                    outbox.push_sink_only(CacheEvent::Collected { key: key.clone() });
                }
                !expired
            });
            before - slots.len()
        };
        outbox.deliver(self.inner.sink.as_ref());
        removed
    }

    /// Run [`collect_garbage`](Self::collect_garbage) every `interval` until
    /// the cache is dropped.
    pub fn spawn_gc_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = ResourceCache { inner }.collect_garbage();
                if removed > 0 {
                    tracing::debug!(target: "hire_query::cache", removed, "garbage collected");
                }
            }
        })
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.inner.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a fetch in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner
            .slots()
            .values()
            .filter(|slot| slot.in_flight.is_some())
            .count()
    }

    /// Flush the event sink, if any.
    pub async fn flush_events(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match &self.inner.sink {
            Some(sink) => sink.flush().await,
            None => Ok(()),
        }
    }

    pub(crate) fn attach_poll(&self, key: &ResourceKey, rule: PollingRule) {
        let mut slots = self.inner.slots();
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(Instant::now()));
        if let Some(mut previous) = slot.poll.take() {
            previous.cancel_timer();
        }
        slot.poll = Some(PollState { rule, timer: None });
        // An outdated value is re-checked when its fetch completes.
        if !slot.state.invalidated {
            self.inner.evaluate_poll(key, slot);
        }
    }

    pub(crate) fn detach_poll(&self, key: &ResourceKey) {
        let mut slots = self.inner.slots();
        if let Some(mut poll) = slots.get_mut(key).and_then(|slot| slot.poll.take()) {
            poll.cancel_timer();
        }
    }

    /// (rule attached, timer pending)
    pub(crate) fn poll_state(&self, key: &ResourceKey) -> (bool, bool) {
        let slots = self.inner.slots();
        match slots.get(key).and_then(|slot| slot.poll.as_ref()) {
            Some(poll) => (true, poll.timer.is_some()),
            None => (false, false),
        }
    }
}

fn snapshot_or_error<V>(state: &EntryState, key: &ResourceKey) -> CacheEntry<V>
where
    V: Clone + Send + Sync + 'static,
{
    state.snapshot(key).unwrap_or_else(|error| CacheEntry {
        key: key.clone(),
        value: None,
        fetched_at: state.fetched_at,
        is_fetching: state.is_fetching,
        error: Some(error),
        is_invalidated: state.invalidated,
    })
}

/// Handle returned by [`ResourceCache::subscribe`]. Unsubscribes on drop.
pub struct Subscription {
    inner: Weak<Inner>,
    key: ResourceKey,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ResourceKind;
    use crate::policy::StalenessPolicy;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_fetcher(
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Fn() -> BoxFuture<'static, Result<String, ApiError>> + Send + Sync + 'static {
        move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(delay).await;
                Ok(format!("v{}", n))
            }
            .boxed()
        }
    }

    fn fresh_for(minutes: u64) -> ResourcePolicy {
        ResourcePolicy::new(StalenessPolicy::max_age(Duration::from_secs(minutes * 60)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_miss_then_hit() {
        let cache = ResourceCache::new();
        let key = ResourceKey::new(ResourceKind::Jobs);
        let calls = Arc::new(AtomicUsize::new(0));

        let first: CacheEntry<String> =
            cache.read(&key, counting_fetcher(calls.clone(), Duration::from_millis(10)), &fresh_for(5));
        assert!(first.is_loading());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second: CacheEntry<String> =
            cache.read(&key, counting_fetcher(calls.clone(), Duration::from_millis(10)), &fresh_for(5));
        assert_eq!(second.value.as_deref(), Some("v1"));
        assert!(!second.is_fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_read_serves_value_and_revalidates() {
        let cache = ResourceCache::new();
        let key = ResourceKey::new(ResourceKind::Jobs);
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = fresh_for(1);

        let _ = cache.read_settled::<String, _, _>(&key, counting_fetcher(calls.clone(), Duration::ZERO), &policy).await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        let stale: CacheEntry<String> = cache.read(&key, counting_fetcher(calls.clone(), Duration::ZERO), &policy);
        assert_eq!(stale.value.as_deref(), Some("v1"));
        assert!(stale.is_fetching);

        tokio::time::sleep(Duration::from_millis(1)).await;
        let fresh: CacheEntry<String> = cache.peek(&key).unwrap();
        assert_eq!(fresh.value.as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_good_value() {
        let cache = ResourceCache::new();
        let key = ResourceKey::entity(ResourceKind::Candidate, 3);
        let policy = ResourcePolicy::new(StalenessPolicy::always());

        let ok = cache
            .read_settled::<String, _, _>(&key, || async { Ok("alice".to_string()) }, &policy)
            .await;
        assert_eq!(ok.value.as_deref(), Some("alice"));

        let failed = cache
            .read_settled::<String, _, _>(&key, || async { Err(ApiError::from_status(500, "boom")) }, &policy)
            .await;
        assert_eq!(failed.value.as_deref(), Some("alice"));
        assert!(matches!(failed.error, Some(ApiError::Server { status: 500, .. })));
        assert!(!failed.is_fetching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_twice_refetches_once() {
        let cache = ResourceCache::new();
        let key = ResourceKey::entity(ResourceKind::ChatHistory, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let _sub = cache.subscribe(&key, |_| {});

        let _ = cache
            .read_settled::<String, _, _>(&key, counting_fetcher(calls.clone(), Duration::from_millis(5)), &fresh_for(5))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let pattern = KeyPattern::Exact(key.clone());
        assert_eq!(cache.invalidate(&pattern), 1);
        assert_eq!(cache.invalidate(&pattern), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let entry: CacheEntry<String> = cache.peek(&key).unwrap();
        assert_eq!(entry.value.as_deref(), Some("v2"));
        assert!(!entry.is_invalidated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_unsubscribed_marks_only() {
        let cache = ResourceCache::new();
        let key = ResourceKey::entity(ResourceKind::Dashboard, 4);
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = fresh_for(5);

        let _ = cache
            .read_settled::<String, _, _>(&key, counting_fetcher(calls.clone(), Duration::ZERO), &policy)
            .await;
        cache.invalidate(&KeyPattern::Kind(ResourceKind::Dashboard));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let entry: CacheEntry<String> = cache.read(&key, counting_fetcher(calls.clone(), Duration::ZERO), &policy);
        assert!(entry.is_fetching);
        assert!(entry.is_invalidated);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_read_fetch_refetches_after() {
        let cache = ResourceCache::new();
        let key = ResourceKey::entity(ResourceKind::Candidate, 8);
        let calls = Arc::new(AtomicUsize::new(0));
        let _sub = cache.subscribe(&key, |_| {});

        let _: CacheEntry<String> =
            cache.read(&key, counting_fetcher(calls.clone(), Duration::from_millis(100)), &fresh_for(5));
        cache.invalidate(&KeyPattern::Exact(key.clone()));
        cache.invalidate(&KeyPattern::Exact(key.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let entry: CacheEntry<String> = cache.peek(&key).unwrap();
        assert_eq!(entry.value.as_deref(), Some("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_sees_transitions() {
        let cache = ResourceCache::new();
        let key = ResourceKey::new(ResourceKind::Health);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = cache.subscribe(&key, move |event| {
            s.lock().unwrap().push(match event {
                CacheEvent::FetchStarted { .. } => "started",
                CacheEvent::FetchSucceeded { .. } => "succeeded",
                CacheEvent::FetchFailed { .. } => "failed",
                CacheEvent::Invalidated { .. } => "invalidated",
                _ => "other",
            });
        });

        let _ = cache
            .read_settled::<u8, _, _>(&key, || async { Ok(1u8) }, &fresh_for(5))
            .await;
        cache.invalidate(&KeyPattern::Kind(ResourceKind::Health));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["started", "succeeded", "invalidated", "started", "succeeded"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_supersedes_in_flight() {
        let cache = ResourceCache::new();
        let key = ResourceKey::entity(ResourceKind::CandidateStatus, 2);
        let calls = Arc::new(AtomicUsize::new(0));

        let _: CacheEntry<String> =
            cache.read(&key, counting_fetcher(calls.clone(), Duration::from_secs(10)), &fresh_for(5));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(cache.refetch(&key));
        assert_eq!(cache.in_flight_count(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        let entry: CacheEntry<String> = cache.peek(&key).unwrap();
        assert_eq!(entry.value.as_deref(), Some("v2"));
        assert!(!cache.refetch(&ResourceKey::new(ResourceKind::Jobs)));
    }

    #[tokio::test]
    async fn test_stale_completion_is_discarded() {
        let cache = ResourceCache::new();
        let key = ResourceKey::entity(ResourceKind::ChatHistory, 1);
        let _: CacheEntry<u64> = cache.read(
            &key,
            || futures::future::pending::<Result<u64, ApiError>>(),
            &fresh_for(5),
        );
        cache.refetch(&key);
        let (first, latest) = {
            let slots = cache.inner.slots();
            let latest = slots[&key].latest_seq;
            (latest - 1, latest)
        };

        cache.inner.complete(&key, latest, Ok(Arc::new(latest)));
        cache.inner.complete(&key, first, Ok(Arc::new(first)));

        let entry: CacheEntry<u64> = cache.peek(&key).unwrap();
        assert_eq!(entry.value, Some(latest));
        assert!(!entry.is_fetching);
    }

    struct RecordingSink(Mutex<Vec<CacheEvent>>);

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        fn emit(&self, event: &CacheEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_sink_sees_discarded_and_collected() {
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let erased: Arc<dyn EventSink> = sink.clone();
        let cache = ResourceCache::with_options(Some(erased), Duration::ZERO);
        let key = ResourceKey::new(ResourceKind::Jobs);

        let _: CacheEntry<u64> = cache.read(
            &key,
            || futures::future::pending::<Result<u64, ApiError>>(),
            &fresh_for(5),
        );
        cache.refetch(&key);
        let latest = cache.inner.slots()[&key].latest_seq;
        cache.inner.complete(&key, latest - 1, Ok(Arc::new(0u64)));
        cache.inner.complete(&key, latest, Ok(Arc::new(1u64)));
        assert_eq!(cache.collect_garbage(), 1);

        let events = sink.0.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, CacheEvent::Discarded { seq, .. } if *seq == latest - 1)));
        assert!(matches!(events.last(), Some(CacheEvent::Collected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_mismatch_surfaces_decode_error() {
        let cache = ResourceCache::new();
        let key = ResourceKey::new(ResourceKind::Jobs);
        let _ = cache
            .read_settled::<u32, _, _>(&key, || async { Ok(7u32) }, &fresh_for(5))
            .await;
        let entry: CacheEntry<String> = cache.peek(&key).unwrap();
        assert!(entry.value.is_none());
        assert!(matches!(entry.error, Some(ApiError::Decode { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_collection_respects_subscribers_and_retention() {
        let cache = ResourceCache::with_options(None, Duration::from_secs(30));
        let watched = ResourceKey::entity(ResourceKind::Candidate, 1);
        let idle = ResourceKey::entity(ResourceKind::Candidate, 2);

        let sub = cache.subscribe(&watched, |_| {});
        let _ = cache
            .read_settled::<u8, _, _>(&idle, || async { Ok(0u8) }, &fresh_for(5))
            .await;

        assert_eq!(cache.collect_garbage(), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.peek::<u8>(&idle).is_none());

        drop(sub);
        assert_eq!(cache.collect_garbage(), 0);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retries_server_errors_but_not_not_found() {
        let cache = ResourceCache::new();
        let policy = ResourcePolicy::new(StalenessPolicy::always()).with_retry(RetryPolicy::exponential(
            3,
            Duration::from_millis(1000),
            Duration::from_millis(30_000),
        ));

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let key = ResourceKey::entity(ResourceKind::ChatHistory, 404);
        let entry = cache
            .read_settled::<String, _, _>(
                &key,
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(ApiError::from_status(404, "Person not found"))
                    }
                },
                &policy,
            )
            .await;
        assert!(entry.error.unwrap().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let key = ResourceKey::entity(ResourceKind::ChatHistory, 500);
        let start = Instant::now();
        let entry = cache
            .read_settled::<String, _, _>(
                &key,
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err(ApiError::from_status(503, "unavailable"))
                    }
                },
                &policy,
            )
            .await;
        assert!(entry.is_error());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_millis(7000));
    }

    proptest! {
        #[test]
        fn prop_concurrent_reads_single_flight(readers in 1usize..32) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async move {
                let cache = ResourceCache::new();
                let key = ResourceKey::entity(ResourceKind::Candidate, 1);
                let calls = Arc::new(AtomicUsize::new(0));
                let mut tasks = Vec::new();
                for _ in 0..readers {
                    let cache = cache.clone();
                    let key = key.clone();
                    let calls = calls.clone();
                    tasks.push(tokio::spawn(async move {
                        let _: CacheEntry<String> = cache.read(
                            &key,
                            counting_fetcher(calls, Duration::from_millis(50)),
                            &ResourcePolicy::new(StalenessPolicy::always()),
                        );
                        assert!(cache.in_flight_count() <= 1);
                    }));
                }
                for task in tasks {
                    task.await.unwrap();
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(calls.load(Ordering::SeqCst), 1);
            });
        }

        #[test]
        fn prop_completions_settle_on_latest_start(
            order in Just((0u64..6).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let cache = ResourceCache::new();
                let key = ResourceKey::entity(ResourceKind::EnrichmentStatus, 1);
                let _: CacheEntry<u64> = cache.read(
                    &key,
                    || futures::future::pending::<Result<u64, ApiError>>(),
                    &ResourcePolicy::new(StalenessPolicy::never()),
                );
                for _ in 1..order.len() {
                    cache.refetch(&key);
                }
                let latest = cache.inner.slots()[&key].latest_seq;
                let first = latest + 1 - order.len() as u64;

                for offset in &order {
                    let seq = first + offset;
                    cache.inner.complete(&key, seq, Ok(Arc::new(seq)));
                }

                let entry: CacheEntry<u64> = cache.peek(&key).unwrap();
                assert_eq!(entry.value, Some(latest));
            });
        }
    }
}
