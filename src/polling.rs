//! Content-driven polling of cached resources.
//!
//! A [`PollingRule`] looks at the last fetched value and decides whether to
//! fetch again and when. The [`PollingController`] attaches rules to keys of a
//! [`ResourceCache`]; the cache evaluates the rule after every successful
//! fetch and keeps at most one pending timer per key. Timers only run while
//! the key has subscribers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResourceCache;
use crate::key::ResourceKey;
use crate::types::{EnrichmentState, EnrichmentStatusResponse};

/// What to do after a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Stop,
    After(Duration),
}

/// A pure function from the last fetched value to a [`PollDecision`].
#[derive(Clone)]
pub struct PollingRule {
    decide: Arc<dyn Fn(&(dyn Any + Send + Sync)) -> PollDecision + Send + Sync>,
}

impl fmt::Debug for PollingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingRule").finish_non_exhaustive()
    }
}

impl PollingRule {
    /// Build a rule for values of type `V`.
    ///
    /// A value of any other type stops polling.
    pub fn new<V, F>(decide: F) -> Self
    where
        V: Send + Sync + 'static,
        F: Fn(&V) -> PollDecision + Send + Sync + 'static,
    {
        PollingRule {
            decide: Arc::new(move |value| match value.downcast_ref::<V>() {
                Some(typed) => decide(typed),
                None => PollDecision::Stop,
            }),
        }
    }

    /// Poll at a fixed interval for as long as the key is subscribed.
    pub fn every(interval: Duration) -> Self {
        PollingRule {
            decide: Arc::new(move |_| PollDecision::After(interval)),
        }
    }

    pub(crate) fn evaluate(&self, value: &(dyn Any + Send + Sync)) -> PollDecision {
        (self.decide)(value)
    }
}

/// Chat history: unconditional polling at `interval`.
pub fn chat_history_rule(interval: Duration) -> PollingRule {
    PollingRule::every(interval)
}

/// Enrichment status: poll at `interval` while the job is processing.
pub fn enrichment_status_rule(interval: Duration) -> PollingRule {
    PollingRule::new(move |status: &EnrichmentStatusResponse| match status.enrichment_status {
        EnrichmentState::Processing => PollDecision::After(interval),
        state => {
            tracing::debug!(
                target: "hire_query::polling",
                person_id = status.person_id,
                ?state,
                finished = state.is_terminal(),
                "enrichment polling stopped"
            );
            PollDecision::Stop
        }
    })
}

/// Attaches and detaches polling rules on a cache.
#[derive(Clone)]
pub struct PollingController {
    cache: ResourceCache,
}

impl PollingController {
    pub fn new(cache: ResourceCache) -> Self {
        PollingController { cache }
    }

    /// Attach `rule` to `key`, replacing any previous rule and pending timer.
    ///
    /// If the key has subscribers and holds a value that is neither
    /// invalidated nor being re-fetched, the rule is evaluated against it
    /// right away. Otherwise the next successful fetch evaluates it.
    pub fn attach(&self, key: &ResourceKey, rule: PollingRule) {
        self.cache.attach_poll(key, rule);
    }

    /// Remove the rule for `key` and cancel its timer.
    pub fn detach(&self, key: &ResourceKey) {
        self.cache.detach_poll(key);
    }

    pub fn is_attached(&self, key: &ResourceKey) -> bool {
        self.cache.poll_state(key).0
    }

    /// Whether a re-fetch timer is pending for `key`.
    pub fn has_pending_timer(&self, key: &ResourceKey) -> bool {
        self.cache.poll_state(key).1
    }
}
