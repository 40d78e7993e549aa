//! Configuration loading for the client.
//!
//! Every field has a default, so an empty TOML document is a valid config.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::key::ResourceKind;
use crate::policy::{PolicyTable, RetryPolicy, StalenessPolicy, default_policy};

/// Overrides `base_url` when set.
pub const BASE_URL_ENV: &str = "HIRE_QUERY_BASE_URL";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub cache: CacheConfig,
    /// Staleness per resource kind (snake_case name), in ms or `"never"`.
    pub staleness: BTreeMap<String, StalenessSetting>,
    pub polling: PollingConfig,
    pub chat: ChatConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub gc_retention_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StalenessSetting {
    Millis(u64),
    Keyword(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PollingConfig {
    pub chat_history_ms: u64,
    pub enrichment_status_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ChatConfig {
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub chat_start: BackoffConfig,
    pub chat_history: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: "http://localhost:8000".to_string(),
            request_timeout_ms: 30_000,
            cache: CacheConfig::default(),
            staleness: BTreeMap::new(),
            polling: PollingConfig::default(),
            chat: ChatConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            chat_history_ms: 5_000,
            enrichment_status_ms: 3_000,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            settle_delay_ms: 1_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            chat_start: BackoffConfig {
                max_retries: 3,
                base_ms: 1_000,
                max_ms: 5_000,
            },
            chat_history: BackoffConfig {
                max_retries: 3,
                base_ms: 1_000,
                max_ms: 30_000,
            },
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_retries,
            Duration::from_millis(self.base_ms),
            Duration::from_millis(self.max_ms),
        )
    }
}

impl StalenessSetting {
    fn policy(&self, field: &'static str) -> Result<StalenessPolicy, ConfigError> {
        match self {
            StalenessSetting::Millis(ms) => Ok(StalenessPolicy::max_age(Duration::from_millis(*ms))),
            StalenessSetting::Keyword(word) if word == "never" => Ok(StalenessPolicy::never()),
            StalenessSetting::Keyword(word) => Err(ConfigError::InvalidValue {
                field,
                reason: format!("expected milliseconds or \"never\", got {:?}", word),
            }),
        }
    }
}

impl ClientConfig {
    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_path(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(BASE_URL_ENV)
            && !url.trim().is_empty()
        {
            self.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.polling.chat_history_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "polling.chat_history_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.polling.enrichment_status_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "polling.enrichment_status_ms",
                reason: "must be > 0".to_string(),
            });
        }
        for (field, backoff) in [
            ("retry.chat_start", &self.retry.chat_start),
            ("retry.chat_history", &self.retry.chat_history),
        ] {
            if backoff.max_ms < backoff.base_ms {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "max_ms must be >= base_ms".to_string(),
                });
            }
        }
        self.policy_table().map(|_| ())
    }

    /// Per-kind policies: defaults, staleness overrides, and the chat-history
    /// read retry.
    pub fn policy_table(&self) -> Result<PolicyTable, ConfigError> {
        let mut overrides = BTreeMap::new();
        for (name, setting) in &self.staleness {
            let kind: ResourceKind = name.parse().map_err(|reason| ConfigError::InvalidValue {
                field: "staleness",
                reason,
            })?;
            overrides.insert(kind, setting.policy("staleness")?);
        }

        let mut table = PolicyTable::new();
        for (kind, staleness) in overrides {
            tracing::debug!(
                target: "hire_query::config",
                kind = %kind,
                max_age_ms = staleness.max_age_value().map(|age| age.as_millis() as u64),
                "staleness override"
            );
            let mut policy = default_policy(kind);
            policy.staleness = staleness;
            table.set(kind, policy);
        }
        let history = table.get(ResourceKind::ChatHistory);
        table.set(
            ResourceKind::ChatHistory,
            history.with_retry(self.retry.chat_history.policy()),
        );
        Ok(table)
    }

    pub fn gc_retention(&self) -> Duration {
        Duration::from_millis(self.cache.gc_retention_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.chat.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.retry.chat_history.max_ms, 30_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_document() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "https://hire.example.com/sajilo"

            [staleness]
            jobs = 1000
            health = "never"

            [chat]
            settle_delay_ms = 250
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.settle_delay(), Duration::from_millis(250));

        let table = config.policy_table().unwrap();
        assert_eq!(
            table.get(ResourceKind::Jobs).staleness,
            StalenessPolicy::max_age(Duration::from_millis(1000))
        );
        assert_eq!(table.get(ResourceKind::Health).staleness, StalenessPolicy::never());
        assert_eq!(table.get(ResourceKind::ChatHistory).retry.max_retries, 3);
        assert_eq!(table.get(ResourceKind::Candidate).retry, RetryPolicy::none());
    }

    #[test]
    fn test_chat_history_override_keeps_configured_retry() {
        let config = ClientConfig::from_toml_str(
            r#"
            [staleness]
            chat_history = 2000

            [retry.chat_history]
            max_retries = 1
            base_ms = 500
            max_ms = 500
            "#,
        )
        .unwrap();
        let policy = config.policy_table().unwrap().get(ResourceKind::ChatHistory);
        assert_eq!(
            policy.staleness.max_age_value(),
            Some(Duration::from_millis(2000))
        );
        assert_eq!(
            policy.retry,
            RetryPolicy::exponential(1, Duration::from_millis(500), Duration::from_millis(500))
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ClientConfig::from_toml_str("base_uri = \"http://x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_invalid_values() {
        let config = ClientConfig {
            request_timeout_ms: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "request_timeout_ms", .. })
        ));

        let config = ClientConfig::from_toml_str("[staleness]\nwidgets = 10").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "staleness", .. })
        ));

        let config = ClientConfig::from_toml_str("[staleness]\njobs = \"sometimes\"").unwrap();
        assert!(config.validate().is_err());

        let config = ClientConfig::from_toml_str("base_url = \"localhost:8000\"").unwrap();
        assert!(config.validate().is_err());
    }
}
