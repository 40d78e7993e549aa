//! State-changing calls and the cache keys they invalidate.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::cache::ResourceCache;
use crate::error::ApiError;
use crate::key::InvalidationSet;
use crate::policy::{RetryPolicy, run_with_retry};

type Action<A, T> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;
type Invalidates<A, T> = Arc<dyn Fn(&A, &T) -> InvalidationSet + Send + Sync>;

/// A state-changing call plus the invalidation set it declares on success.
///
/// Mutations run once per call unless a [`RetryPolicy`] is configured.
pub struct Mutation<A, T> {
    name: &'static str,
    action: Action<A, T>,
    invalidates: Invalidates<A, T>,
    retry: RetryPolicy,
}

impl<A, T> Clone for Mutation<A, T> {
    fn clone(&self) -> Self {
        Mutation {
            name: self.name,
            action: Arc::clone(&self.action),
            invalidates: Arc::clone(&self.invalidates),
            retry: self.retry,
        }
    }
}

impl<A, T> fmt::Debug for Mutation<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<A, T> Mutation<A, T>
where
    A: Clone + Send + 'static,
    T: Send + 'static,
{
    /// # Arguments
    /// * `name` - Used in logs
    /// * `action` - Performs the network call; invoked once per attempt
    pub fn new<F, Fut>(name: &'static str, action: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        Mutation {
            name,
            action: Arc::new(move |args| action(args).boxed()),
            invalidates: Arc::new(|_, _| InvalidationSet::new()),
            retry: RetryPolicy::none(),
        }
    }

    /// Declare the keys to invalidate after a successful call.
    pub fn invalidates<I>(mut self, invalidates: I) -> Self
    where
        I: Fn(&A, &T) -> InvalidationSet + Send + Sync + 'static,
    {
        self.invalidates = Arc::new(invalidates);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// The keys a successful call with `args` returning `result` invalidates.
    pub fn invalidation_set(&self, args: &A, result: &T) -> InvalidationSet {
        (self.invalidates)(args, result)
    }
}

/// Executes mutations and applies their invalidation sets to the cache.
///
/// Concurrent calls are never de-duplicated: every `mutate` call performs
/// its own network call(s).
#[derive(Clone)]
pub struct MutationDispatcher {
    cache: ResourceCache,
}

impl MutationDispatcher {
    pub fn new(cache: ResourceCache) -> Self {
        MutationDispatcher { cache }
    }

    /// Run `mutation` with `args`.
    ///
    /// On success the declared invalidation set is applied before this
    /// returns. On failure the cache is left untouched and the error is
    /// returned; showing it to the user is the caller's job.
    pub async fn mutate<A, T>(&self, mutation: &Mutation<A, T>, args: A) -> Result<T, ApiError>
    where
        A: Clone + Send + 'static,
        T: Send + 'static,
    {
        let result = run_with_retry(&mutation.retry, mutation.name, || {
            (mutation.action)(args.clone())
        })
        .await;

        match result {
            Ok(value) => {
                let set = (mutation.invalidates)(&args, &value);
                let matched: usize = set
                    .patterns()
                    .iter()
                    .map(|pattern| self.cache.invalidate(pattern))
                    .sum();
                tracing::debug!(
                    target: "hire_query::mutation",
                    mutation = mutation.name,
                    patterns = set.patterns().len(),
                    matched,
                    "mutation succeeded"
                );
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(
                    target: "hire_query::mutation",
                    mutation = mutation.name,
                    error = %err,
                    "mutation failed"
                );
                Err(err)
            }
        }
    }
}
