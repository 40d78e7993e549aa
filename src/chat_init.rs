//! Starts the interview conversation once history is found to be empty.
//!
//! ```text
//! Uninitialized --(0 turns, settle delay)--> Initializing --(start ok)--> Initialized
//!       ^                                         |
//!       +------------ reset() --- InitializationFailed <--(start err)
//!
//! any state --(turns > 0)--> Initialized
//! ```

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use crate::cache::{ResourceCache, Subscription};
use crate::entry::CacheEntry;
use crate::error::ApiError;
use crate::events::CacheEvent;
use crate::key::ResourceKey;
use crate::types::ChatHistory;

/// Delay between seeing an empty history and starting the chat, giving the
/// freshly created applicant record time to propagate upstream.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInitState {
    Uninitialized,
    Initializing,
    Initialized,
    InitializationFailed(ApiError),
}

impl ChatInitState {
    /// Message to show for a failed initialization.
    pub fn failure_message(&self) -> Option<&'static str> {
        match self {
            ChatInitState::InitializationFailed(err) if err.is_not_found() => Some(
                "We couldn't find your application. Please submit the application form again.",
            ),
            ChatInitState::InitializationFailed(_) => {
                Some("We couldn't start the interview. Please try again.")
            }
            _ => None,
        }
    }
}

type StartChat = Arc<dyn Fn() -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

struct InitInner {
    state: watch::Sender<ChatInitState>,
    attempt_in_flight: AtomicBool,
    settle_delay: Duration,
    start: StartChat,
}

/// Drives [`ChatInitState`] from observed chat histories.
#[derive(Clone)]
pub struct ChatInitializer {
    inner: Arc<InitInner>,
}

impl ChatInitializer {
    /// # Arguments
    /// * `settle_delay` - Wait before calling `start`
    /// * `start` - The start-chat call, including its own retries
    pub fn new<F, Fut>(settle_delay: Duration, start: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        let (state, _) = watch::channel(ChatInitState::Uninitialized);
        ChatInitializer {
            inner: Arc::new(InitInner {
                state,
                attempt_in_flight: AtomicBool::new(false),
                settle_delay,
                start: Arc::new(move || start().boxed()),
            }),
        }
    }

    pub fn state(&self) -> ChatInitState {
        self.inner.state.borrow().clone()
    }

    /// Receive every state change.
    pub fn watch(&self) -> watch::Receiver<ChatInitState> {
        self.inner.state.subscribe()
    }

    /// Feed the result of a chat-history read.
    pub fn observe(&self, history: &ChatHistory) {
        self.observe_turns(history.total_turns);
    }

    pub fn observe_turns(&self, total_turns: u32) {
        if total_turns > 0 {
            self.inner.state.send_if_modified(|state| {
                if *state == ChatInitState::Initialized {
                    return false;
                }
                tracing::info!(target: "hire_query::chat_init", total_turns, "chat already has turns");
                *state = ChatInitState::Initialized;
                true
            });
            return;
        }

        if *self.inner.state.borrow() != ChatInitState::Uninitialized {
            return;
        }
        if self
            .inner
            .attempt_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.settle_delay).await;
            let proceed = inner.state.send_if_modified(|state| {
                if *state != ChatInitState::Uninitialized {
                    return false;
                }
                *state = ChatInitState::Initializing;
                true
            });
            if proceed {
                tracing::info!(target: "hire_query::chat_init", "starting chat");
                let result = (inner.start)().await;
                inner.state.send_if_modified(|state| {
                    if *state != ChatInitState::Initializing {
                        return false;
                    }
                    *state = match result {
                        Ok(()) => ChatInitState::Initialized,
                        Err(err) => {
                            tracing::warn!(target: "hire_query::chat_init", error = %err, "chat start failed");
                            ChatInitState::InitializationFailed(err)
                        }
                    };
                    true
                });
            }
            inner.attempt_in_flight.store(false, Ordering::SeqCst);
        });
    }

    /// Leave `InitializationFailed` so the next empty history retries.
    pub fn reset(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if !matches!(state, ChatInitState::InitializationFailed(_)) {
                return false;
            }
            *state = ChatInitState::Uninitialized;
            true
        })
    }

    /// Observe every successful fetch of the chat-history `key` in `cache`.
    ///
    /// The initializer stays attached until the subscription is dropped.
    pub fn attach(&self, cache: &ResourceCache, key: &ResourceKey) -> Subscription {
        let initializer = self.clone();
        let reader = cache.clone();
        let key_for_listener = key.clone();
        let subscription = cache.subscribe(key, move |event| {
            if let CacheEvent::FetchSucceeded { .. } = event {
                let entry: Option<CacheEntry<ChatHistory>> = reader.peek(&key_for_listener);
                if let Some(history) = entry.and_then(|entry| entry.value) {
                    initializer.observe(&history);
                }
            }
        });
        if let Some(history) = cache
            .peek::<ChatHistory>(key)
            .and_then(|entry| entry.value)
        {
            self.observe(&history);
        }
        subscription
    }
}
