use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ApiError;
use crate::key::ResourceKey;

/// Type-erased cached value.
///
/// Values of every resource kind share one cache, so they are stored as
/// `Arc<dyn Any>` and downcast back to the concrete type on read. Cloning is a
/// reference count bump.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// A snapshot of one cache entry, as seen by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: ResourceKey,
    /// The last successfully fetched value. Kept when a later fetch fails.
    pub value: Option<V>,
    /// When `value` was fetched.
    pub fetched_at: Option<Instant>,
    pub is_fetching: bool,
    /// The error of the most recent fetch, cleared on the next success.
    pub error: Option<ApiError>,
    /// Whether the entry was invalidated after `value` was fetched.
    pub is_invalidated: bool,
}

impl<V> CacheEntry<V> {
    /// No value yet and a fetch is running.
    pub fn is_loading(&self) -> bool {
        self.value.is_none() && self.is_fetching
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Time since `value` was fetched.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.fetched_at
            .map(|fetched_at| now.saturating_duration_since(fetched_at))
    }
}

/// Mutable state of an entry, owned by the cache.
#[derive(Clone, Default)]
pub(crate) struct EntryState {
    pub value: Option<ErasedValue>,
    pub fetched_at: Option<Instant>,
    pub is_fetching: bool,
    pub error: Option<ApiError>,
    pub invalidated: bool,
}

impl EntryState {
    /// Convert to a typed snapshot.
    ///
    /// Fails with a decode error when the stored value is of another type than
    /// the one requested for this key.
    pub fn snapshot<V>(&self, key: &ResourceKey) -> Result<CacheEntry<V>, ApiError>
    where
        V: Clone + Send + Sync + 'static,
    {
        let value = match &self.value {
            Some(erased) => Some(downcast_value::<V>(erased, key)?),
            None => None,
        };
        Ok(CacheEntry {
            key: key.clone(),
            value,
            fetched_at: self.fetched_at,
            is_fetching: self.is_fetching,
            error: self.error.clone(),
            is_invalidated: self.invalidated,
        })
    }
}

/// Downcast an erased value and clone it out of its `Arc`.
pub(crate) fn downcast_value<V>(erased: &ErasedValue, key: &ResourceKey) -> Result<V, ApiError>
where
    V: Clone + Send + Sync + 'static,
{
    erased
        .clone()
        .downcast::<V>()
        .map(|typed| (*typed).clone())
        .map_err(|_| {
            ApiError::decode(format!(
                "cached value for '{}' is not a {}",
                key,
                std::any::type_name::<V>()
            ))
        })
}
