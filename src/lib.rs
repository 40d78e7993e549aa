//! hire-query - Typed client and stale-while-revalidate query layer for a
//! recruiting-platform API
//!
//! This library provides:
//! - A request client that normalizes every failure into [`ApiError`]
//! - A keyed resource cache with per-kind staleness, single-flight fetches
//!   and last-request-wins ordering
//! - Content-driven polling of chat history and enrichment status
//! - Mutations that invalidate the resources they change
//! - A state machine that starts the interview chat exactly once
//!
//! # Example
//!
//! ```ignore
//! use hire_query::{ClientConfig, QueriesBuilder, PersonCreate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queries = QueriesBuilder::new(ClientConfig::default()).build()?;
//!
//!     let person = queries
//!         .create_person(PersonCreate {
//!             first_name: "Ada".into(),
//!             last_name: "Lovelace".into(),
//!             email: "ada@example.com".into(),
//!             phone: None,
//!             job_id: 1,
//!         })
//!         .await?;
//!
//!     // Subscribes, polls every 5s, and starts the chat if it is empty.
//!     let session = queries.open_interview(person.id, |event| println!("{:?}", event));
//!     let mut state = session.initializer.watch();
//!     state.changed().await?;
//!     Ok(())
//! }
//! ```

mod builder;
mod cache;
mod chat_init;
pub mod client;
mod config;
mod entry;
mod error;
mod events;
mod key;
mod mutation;
mod policy;
mod polling;
pub mod queries;
pub mod telemetry;
pub mod types;

// Re-export public API
pub use builder::QueriesBuilder;
pub use cache::{ResourceCache, Subscription};
pub use chat_init::{ChatInitState, ChatInitializer, DEFAULT_SETTLE_DELAY};
pub use client::ApiClient;
pub use config::{
    BASE_URL_ENV, BackoffConfig, CacheConfig, ChatConfig, ClientConfig, PollingConfig,
    RetryConfig, StalenessSetting,
};
pub use entry::CacheEntry;
pub use error::{ApiError, ConfigError};
pub use events::{CacheEvent, EventSink, Listener, TracingSink};
pub use key::{InvalidationSet, KeyPattern, ResourceKey, ResourceKind};
pub use mutation::{Mutation, MutationDispatcher};
pub use policy::{
    PolicyTable, ResourcePolicy, RetryPolicy, StalenessPolicy, default_policy, default_staleness,
    run_with_retry,
};
pub use polling::{
    PollDecision, PollingController, PollingRule, chat_history_rule, enrichment_status_rule,
};
pub use queries::{InterviewSession, Queries, QueryTuning};
pub use types::*;
