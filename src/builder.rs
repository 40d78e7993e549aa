//! Builder API for wiring the client, cache and query layer from config.
//!
//! # Example
//!
//! ```ignore
//! use hire_query::{ClientConfig, QueriesBuilder};
//!
//! let config = ClientConfig::from_toml_str(r#"base_url = "https://hire.example.com""#)?;
//! let queries = QueriesBuilder::new(config)
//!     .gc_sweep_interval(std::time::Duration::from_secs(60))
//!     .build()?;
//!
//! let jobs = queries.jobs();
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResourceCache;
use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::error::ConfigError;
use crate::events::{EventSink, TracingSink};
use crate::queries::{Queries, QueryTuning};

/// Builder for a [`Queries`] instance.
///
/// Cache events go to a [`TracingSink`] unless another sink is set.
pub struct QueriesBuilder {
    config: ClientConfig,
    sink: Option<Arc<dyn EventSink>>,
    http: Option<reqwest::Client>,
    gc_interval: Option<Duration>,
}

impl QueriesBuilder {
    pub fn new(config: ClientConfig) -> Self {
        QueriesBuilder {
            config,
            sink: Some(Arc::new(TracingSink)),
            http: None,
            gc_interval: None,
        }
    }

    /// Send cache events to `sink` instead of the tracing sink.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Drop cache events.
    pub fn without_sink(mut self) -> Self {
        self.sink = None;
        self
    }

    /// Use an existing `reqwest::Client`; `request_timeout_ms` is then ignored.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Collect unsubscribed entries every `interval`. Requires a tokio
    /// runtime at [`build`](Self::build) time.
    pub fn gc_sweep_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    /// Validate the config and build.
    pub fn build(self) -> Result<Queries, ConfigError> {
        self.config.validate()?;
        let policies = self.config.policy_table()?;

        let client = match self.http {
            Some(http) => ApiClient::with_client(http, &self.config.base_url),
            None => ApiClient::new(&self.config).map_err(ConfigError::Http)?,
        };
        let cache = ResourceCache::with_options(self.sink, self.config.gc_retention());
        if let Some(interval) = self.gc_interval {
            cache.spawn_gc_sweeper(interval);
        }

        let tuning = QueryTuning {
            chat_history_poll: Duration::from_millis(self.config.polling.chat_history_ms),
            enrichment_status_poll: Duration::from_millis(self.config.polling.enrichment_status_ms),
            chat_start_retry: self.config.retry.chat_start.policy(),
            settle_delay: self.config.settle_delay(),
        };
        tracing::debug!(
            target: "hire_query::client",
            base_url = %client.base_url(),
            "query client built"
        );
        Ok(Queries::new(client, cache, policies, tuning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ResourceKind;
    use crate::policy::StalenessPolicy;

    #[test]
    fn test_build_applies_config() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "http://api.test/sajilo/"

            [staleness]
            candidate = "never"
            "#,
        )
        .unwrap();
        let queries = QueriesBuilder::new(config).without_sink().build().unwrap();

        assert_eq!(queries.client().base_url(), "http://api.test/sajilo");
        assert_eq!(
            queries.policy(ResourceKind::Candidate).staleness,
            StalenessPolicy::never()
        );
        assert_eq!(queries.policy(ResourceKind::ChatHistory).retry.max_retries, 3);
        assert!(queries.cache().is_empty());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ClientConfig {
            base_url: String::new(),
            ..ClientConfig::default()
        };
        let err = QueriesBuilder::new(config).build().err().unwrap();
        assert!(matches!(err, ConfigError::InvalidValue { field: "base_url", .. }));
    }
}
