//! Cache transition events.
//!
//! Per-key listeners registered with [`ResourceCache::subscribe`] receive the
//! transitions of their key. An [`EventSink`] installed on the cache receives
//! every event for every key, including discarded completions and garbage
//! collection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Mutex;
//! use async_trait::async_trait;
//! use hire_query::{CacheEvent, EventSink};
//!
//! struct BufferedSink {
//!     buffer: Mutex<Vec<CacheEvent>>,
//! }
//!
//! #[async_trait]
//! impl EventSink for BufferedSink {
//!     fn emit(&self, event: &CacheEvent) {
//!         self.buffer.lock().unwrap().push(event.clone());
//!     }
//! }
//! ```
//!
//! [`ResourceCache::subscribe`]: crate::ResourceCache::subscribe

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ApiError;
use crate::key::ResourceKey;

/// A state change of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A fetch with sequence number `seq` was issued.
    FetchStarted { key: ResourceKey, seq: u64 },
    /// The fetch with sequence number `seq` stored a new value.
    FetchSucceeded { key: ResourceKey, seq: u64 },
    /// The fetch with sequence number `seq` failed; the previous value is kept.
    FetchFailed {
        key: ResourceKey,
        seq: u64,
        error: ApiError,
    },
    /// The entry was marked outdated.
    Invalidated { key: ResourceKey },
    /// A completion arrived for a superseded fetch and was dropped.
    /// Sink only; the entry did not change.
    Discarded { key: ResourceKey, seq: u64 },
    /// The entry was garbage collected. Sink only.
    Collected { key: ResourceKey },
}

impl CacheEvent {
    pub fn key(&self) -> &ResourceKey {
        match self {
            CacheEvent::FetchStarted { key, .. }
            | CacheEvent::FetchSucceeded { key, .. }
            | CacheEvent::FetchFailed { key, .. }
            | CacheEvent::Invalidated { key }
            | CacheEvent::Discarded { key, .. }
            | CacheEvent::Collected { key } => key,
        }
    }

    /// Whether subscribed listeners see this event.
    pub fn is_transition(&self) -> bool {
        !matches!(
            self,
            CacheEvent::Discarded { .. } | CacheEvent::Collected { .. }
        )
    }
}

/// Per-key subscriber callback.
pub type Listener = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

/// Receives every cache event.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Called synchronously right after the transition, outside the cache
    /// lock. Implementations should be fast.
    fn emit(&self, event: &CacheEvent);

    /// Flush buffered events. Called at shutdown.
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Default sink: one `debug!` line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    fn emit(&self, event: &CacheEvent) {
        match event {
            CacheEvent::FetchStarted { key, seq } => {
                tracing::debug!(target: "hire_query::cache", key = %key, seq, "fetch started");
            }
            CacheEvent::FetchSucceeded { key, seq } => {
                tracing::debug!(target: "hire_query::cache", key = %key, seq, "fetch succeeded");
            }
            CacheEvent::FetchFailed { key, seq, error } => {
                tracing::warn!(target: "hire_query::cache", key = %key, seq, error = %error, "fetch failed");
            }
            CacheEvent::Invalidated { key } => {
                tracing::debug!(target: "hire_query::cache", key = %key, "invalidated");
            }
            CacheEvent::Discarded { key, seq } => {
                tracing::debug!(target: "hire_query::cache", key = %key, seq, "superseded completion discarded");
            }
            CacheEvent::Collected { key } => {
                tracing::debug!(target: "hire_query::cache", key = %key, "collected");
            }
        }
    }
}
