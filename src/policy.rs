//! Staleness and retry policies, configured per resource kind.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ApiError;
use crate::key::ResourceKind;

/// How long a fetched value may be served before a read triggers a re-fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    /// `None` means the value never goes stale on its own.
    max_age: Option<Duration>,
}

impl StalenessPolicy {
    /// Refetch on every read.
    pub const fn always() -> Self {
        StalenessPolicy {
            max_age: Some(Duration::ZERO),
        }
    }

    /// Fetch once and never refresh automatically.
    pub const fn never() -> Self {
        StalenessPolicy { max_age: None }
    }

    pub const fn max_age(max_age: Duration) -> Self {
        StalenessPolicy {
            max_age: Some(max_age),
        }
    }

    pub fn max_age_value(&self) -> Option<Duration> {
        self.max_age
    }

    /// Check if a value fetched at `fetched_at` is stale at `now`.
    pub fn is_stale(&self, fetched_at: Instant, now: Instant) -> bool {
        match self.max_age {
            None => false,
            Some(max_age) if max_age.is_zero() => true,
            Some(max_age) => now.saturating_duration_since(fetched_at) >= max_age,
        }
    }
}

/// Exponential backoff for automatic retries.
///
/// Attempt `n` (zero based) waits `min(base_delay * 2^n, max_delay)`. Only
/// errors for which [`ApiError::is_retryable`] holds are retried, so a
/// not-found response always surfaces on the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub const fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether to retry after `failures` failed attempts ending in `err`.
    pub fn should_retry(&self, failures: u32, err: &ApiError) -> bool {
        failures <= self.max_retries && err.is_retryable()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::none()
    }
}

/// Run `op` until it succeeds, the error is not retryable, or retries run out.
///
/// Intermediate failures are logged and never surfaced.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut failures = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                failures += 1;
                if !policy.should_retry(failures, &err) {
                    return Err(err);
                }
                let delay = policy.delay_for(failures - 1);
                tracing::warn!(
                    target: "hire_query::retry",
                    label,
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Staleness plus read-retry policy of one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub staleness: StalenessPolicy,
    pub retry: RetryPolicy,
}

impl ResourcePolicy {
    pub const fn new(staleness: StalenessPolicy) -> Self {
        ResourcePolicy {
            staleness,
            retry: RetryPolicy::none(),
        }
    }

    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

const MINUTE: Duration = Duration::from_secs(60);

/// Default staleness window per kind.
pub fn default_staleness(kind: ResourceKind) -> StalenessPolicy {
    match kind {
        ResourceKind::Health => StalenessPolicy::max_age(2 * MINUTE),
        ResourceKind::Jobs
        | ResourceKind::Dashboard
        | ResourceKind::JobProfile
        | ResourceKind::JobProfileContext
        | ResourceKind::JobSkillsAnalysis
        | ResourceKind::ScoringAnalysis => StalenessPolicy::max_age(5 * MINUTE),
        ResourceKind::Candidate => StalenessPolicy::max_age(MINUTE),
        ResourceKind::InterviewReadiness => StalenessPolicy::max_age(Duration::from_secs(30)),
        ResourceKind::SocialIntelligence
        | ResourceKind::ProfessionalSummary
        | ResourceKind::HrRecommendations => StalenessPolicy::max_age(10 * MINUTE),
        ResourceKind::ChatHistory
        | ResourceKind::EnrichmentStatus
        | ResourceKind::CandidateStatus => StalenessPolicy::always(),
    }
}

/// Default policy per kind. Only chat-history reads retry.
pub fn default_policy(kind: ResourceKind) -> ResourcePolicy {
    let policy = ResourcePolicy::new(default_staleness(kind));
    match kind {
        ResourceKind::ChatHistory => policy.with_retry(RetryPolicy::exponential(
            3,
            Duration::from_millis(1000),
            Duration::from_millis(30_000),
        )),
        _ => policy,
    }
}

/// Per-kind policies with defaults for kinds that were not overridden.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    overrides: HashMap<ResourceKind, ResourcePolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: ResourceKind, policy: ResourcePolicy) {
        self.overrides.insert(kind, policy);
    }

    pub fn get(&self, kind: ResourceKind) -> ResourcePolicy {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| default_policy(kind))
    }
}
