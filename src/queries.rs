//! Typed reads and mutations of the hiring-platform API, backed by the
//! resource cache.
//!
//! Reads return the current [`CacheEntry`] and schedule a fetch when the
//! entry is missing, stale or invalidated. Mutations go through the
//! [`MutationDispatcher`] and invalidate the resources they change.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{ResourceCache, Subscription};
use crate::chat_init::ChatInitializer;
use crate::client::ApiClient;
use crate::entry::CacheEntry;
use crate::error::ApiError;
use crate::events::CacheEvent;
use crate::key::{InvalidationSet, KeyPattern, ResourceKey, ResourceKind};
use crate::mutation::{Mutation, MutationDispatcher};
use crate::policy::{PolicyTable, ResourcePolicy, RetryPolicy};
use crate::polling::{PollingController, chat_history_rule, enrichment_status_rule};
use crate::types::{
    ActionResponse, CandidateStatusResponse, ChatHistory, ChatResponse, DashboardResponse,
    EnrichmentStatusResponse, FullCandidateResponse, HealthResponse, InterviewReadinessResponse,
    JobId, JobProfileResponse, JobResponse, PersonCreate, PersonExtend, PersonId, PersonResponse,
};

/// Cache keys of every readable resource.
pub mod keys {
    use super::*;

    pub fn health() -> ResourceKey {
        ResourceKey::new(ResourceKind::Health)
    }

    pub fn jobs() -> ResourceKey {
        ResourceKey::new(ResourceKind::Jobs)
    }

    pub fn dashboard(job_id: JobId, include_borderline: bool) -> ResourceKey {
        ResourceKey::entity(ResourceKind::Dashboard, job_id)
            .with_param("include_borderline", include_borderline)
    }

    pub fn candidate(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::Candidate, person_id)
    }

    pub fn candidate_status(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::CandidateStatus, person_id)
    }

    pub fn enrichment_status(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::EnrichmentStatus, person_id)
    }

    pub fn chat_history(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::ChatHistory, person_id)
    }

    pub fn interview_readiness(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::InterviewReadiness, person_id)
    }

    pub fn scoring_analysis(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::ScoringAnalysis, person_id)
    }

    pub fn job_profile(job_id: JobId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::JobProfile, job_id)
    }

    pub fn job_profile_context(job_id: JobId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::JobProfileContext, job_id)
    }

    pub fn job_skills_analysis(job_id: JobId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::JobSkillsAnalysis, job_id)
    }

    pub fn social_intelligence(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::SocialIntelligence, person_id)
    }

    pub fn professional_summary(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::ProfessionalSummary, person_id)
    }

    pub fn hr_recommendations(person_id: PersonId) -> ResourceKey {
        ResourceKey::entity(ResourceKind::HrRecommendations, person_id)
    }
}

fn person(kind: ResourceKind, person_id: PersonId) -> KeyPattern {
    KeyPattern::Entity(kind, person_id.to_string())
}

/// Mutation definitions with the invalidation set each one declares.
pub mod mutations {
    use super::*;

    pub fn create_person(client: &ApiClient) -> Mutation<PersonCreate, PersonResponse> {
        let client = client.clone();
        Mutation::new("create_person", move |body: PersonCreate| {
            let client = client.clone();
            async move { client.create_person(&body).await }
        })
        .invalidates(|_, _| InvalidationSet::new().with(ResourceKind::Dashboard))
    }

    pub fn extend_person(client: &ApiClient) -> Mutation<(PersonId, PersonExtend), PersonResponse> {
        let client = client.clone();
        Mutation::new("extend_person", move |(person_id, body): (PersonId, PersonExtend)| {
            let client = client.clone();
            async move { client.extend_person(person_id, &body).await }
        })
        .invalidates(|(person_id, _), _| {
            InvalidationSet::new()
                .with(person(ResourceKind::Candidate, *person_id))
                .with(ResourceKind::Dashboard)
        })
    }

    pub fn start_chat(client: &ApiClient, retry: RetryPolicy) -> Mutation<PersonId, ChatResponse> {
        let client = client.clone();
        Mutation::new("start_chat", move |person_id: PersonId| {
            let client = client.clone();
            async move { client.start_chat(person_id).await }
        })
        .invalidates(|person_id, _| {
            InvalidationSet::new().with(person(ResourceKind::ChatHistory, *person_id))
        })
        .with_retry(retry)
    }

    pub fn send_message(client: &ApiClient) -> Mutation<(PersonId, String), ChatResponse> {
        let client = client.clone();
        Mutation::new("send_message", move |(person_id, message): (PersonId, String)| {
            let client = client.clone();
            async move { client.send_message(person_id, &message).await }
        })
        .invalidates(|(person_id, _), _| {
            InvalidationSet::new()
                .with(person(ResourceKind::ChatHistory, *person_id))
                .with(person(ResourceKind::Candidate, *person_id))
        })
    }

    pub fn trigger_enrichment(client: &ApiClient) -> Mutation<PersonId, ActionResponse> {
        let client = client.clone();
        Mutation::new("trigger_enrichment", move |person_id: PersonId| {
            let client = client.clone();
            async move { client.trigger_enrichment(person_id).await }
        })
        .invalidates(|person_id, _| {
            InvalidationSet::new()
                .with(person(ResourceKind::EnrichmentStatus, *person_id))
                .with(person(ResourceKind::CandidateStatus, *person_id))
                .with(person(ResourceKind::Candidate, *person_id))
                .with(person(ResourceKind::ScoringAnalysis, *person_id))
                .with(ResourceKind::Dashboard)
        })
    }

    pub fn refresh_enrichment(client: &ApiClient) -> Mutation<PersonId, ActionResponse> {
        let client = client.clone();
        Mutation::new("refresh_enrichment", move |person_id: PersonId| {
            let client = client.clone();
            async move { client.refresh_enrichment(person_id).await }
        })
        .invalidates(|person_id, _| {
            InvalidationSet::new()
                .with(person(ResourceKind::Candidate, *person_id))
                .with(person(ResourceKind::SocialIntelligence, *person_id))
                .with(person(ResourceKind::ProfessionalSummary, *person_id))
                .with(person(ResourceKind::HrRecommendations, *person_id))
                .with(ResourceKind::Dashboard)
        })
    }

    pub fn prepare_interview(client: &ApiClient) -> Mutation<(PersonId, bool), ActionResponse> {
        let client = client.clone();
        Mutation::new("prepare_interview", move |(person_id, force): (PersonId, bool)| {
            let client = client.clone();
            async move { client.prepare_interview(person_id, force).await }
        })
        .invalidates(|(person_id, _), _| {
            InvalidationSet::new()
                .with(person(ResourceKind::InterviewReadiness, *person_id))
                .with(person(ResourceKind::CandidateStatus, *person_id))
        })
    }
}

/// Intervals and retries that are not part of the per-kind policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTuning {
    pub chat_history_poll: Duration,
    pub enrichment_status_poll: Duration,
    pub chat_start_retry: RetryPolicy,
    pub settle_delay: Duration,
}

impl Default for QueryTuning {
    fn default() -> Self {
        QueryTuning {
            chat_history_poll: Duration::from_secs(5),
            enrichment_status_poll: Duration::from_secs(3),
            chat_start_retry: RetryPolicy::exponential(
                3,
                Duration::from_millis(1000),
                Duration::from_millis(5000),
            ),
            settle_delay: crate::chat_init::DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Entry point for views: typed reads, mutations, polling and the chat
/// initializer over one shared cache.
#[derive(Clone)]
pub struct Queries {
    client: ApiClient,
    cache: ResourceCache,
    polling: PollingController,
    dispatcher: MutationDispatcher,
    policies: Arc<PolicyTable>,
    tuning: QueryTuning,
}

/// Subscriptions held while an interview view is open.
///
/// Dropping the session stops chat-history polling.
pub struct InterviewSession {
    pub initializer: ChatInitializer,
    _history: Subscription,
    _init: Subscription,
}

impl Queries {
    pub fn new(client: ApiClient, cache: ResourceCache, policies: PolicyTable, tuning: QueryTuning) -> Self {
        Queries {
            polling: PollingController::new(cache.clone()),
            dispatcher: MutationDispatcher::new(cache.clone()),
            client,
            cache,
            policies: Arc::new(policies),
            tuning,
        }
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn polling(&self) -> &PollingController {
        &self.polling
    }

    pub fn dispatcher(&self) -> &MutationDispatcher {
        &self.dispatcher
    }

    pub fn policy(&self, kind: ResourceKind) -> ResourcePolicy {
        self.policies.get(kind)
    }

    fn read<V, F, Fut>(&self, key: ResourceKey, fetch: F) -> CacheEntry<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn(ApiClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let client = self.client.clone();
        let policy = self.policies.get(key.kind());
        self.cache.read(&key, move || fetch(client.clone()), &policy)
    }

    pub fn health(&self) -> CacheEntry<HealthResponse> {
        self.read(keys::health(), |c| async move { c.health().await })
    }

    pub fn jobs(&self) -> CacheEntry<Vec<JobResponse>> {
        self.read(keys::jobs(), |c| async move { c.jobs().await })
    }

    pub fn dashboard(&self, job_id: JobId, include_borderline: bool) -> CacheEntry<DashboardResponse> {
        self.read(keys::dashboard(job_id, include_borderline), move |c| async move {
            c.dashboard(job_id, include_borderline).await
        })
    }

    pub fn candidate(&self, person_id: PersonId) -> CacheEntry<FullCandidateResponse> {
        self.read(keys::candidate(person_id), move |c| async move {
            c.candidate(person_id).await
        })
    }

    pub fn candidate_status(&self, person_id: PersonId) -> CacheEntry<CandidateStatusResponse> {
        self.read(keys::candidate_status(person_id), move |c| async move {
            c.candidate_status(person_id).await
        })
    }

    pub fn enrichment_status(&self, person_id: PersonId) -> CacheEntry<EnrichmentStatusResponse> {
        self.read(keys::enrichment_status(person_id), move |c| async move {
            c.enrichment_status(person_id).await
        })
    }

    /// Chat history, retried on transient failures. A 404 surfaces at once.
    pub fn chat_history(&self, person_id: PersonId) -> CacheEntry<ChatHistory> {
        self.read(keys::chat_history(person_id), move |c| async move {
            c.chat_history(person_id).await
        })
    }

    pub fn interview_readiness(&self, person_id: PersonId) -> CacheEntry<InterviewReadinessResponse> {
        self.read(keys::interview_readiness(person_id), move |c| async move {
            c.interview_readiness(person_id).await
        })
    }

    pub fn scoring_analysis(&self, person_id: PersonId) -> CacheEntry<serde_json::Value> {
        self.read(keys::scoring_analysis(person_id), move |c| async move {
            c.scoring_analysis(person_id).await
        })
    }

    pub fn job_profile(&self, job_id: JobId) -> CacheEntry<JobProfileResponse> {
        self.read(keys::job_profile(job_id), move |c| async move {
            c.job_profile(job_id).await
        })
    }

    pub fn job_profile_context(&self, job_id: JobId) -> CacheEntry<serde_json::Value> {
        self.read(keys::job_profile_context(job_id), move |c| async move {
            c.job_profile_context(job_id).await
        })
    }

    pub fn job_skills_analysis(&self, job_id: JobId) -> CacheEntry<serde_json::Value> {
        self.read(keys::job_skills_analysis(job_id), move |c| async move {
            c.job_skills_analysis(job_id).await
        })
    }

    pub fn social_intelligence(&self, person_id: PersonId) -> CacheEntry<serde_json::Value> {
        self.read(keys::social_intelligence(person_id), move |c| async move {
            c.social_intelligence(person_id).await
        })
    }

    pub fn professional_summary(&self, person_id: PersonId) -> CacheEntry<serde_json::Value> {
        self.read(keys::professional_summary(person_id), move |c| async move {
            c.professional_summary(person_id).await
        })
    }

    pub fn hr_recommendations(&self, person_id: PersonId) -> CacheEntry<serde_json::Value> {
        self.read(keys::hr_recommendations(person_id), move |c| async move {
            c.hr_recommendations(person_id).await
        })
    }

    /// Wait for the fetch of `key` started by an earlier read to finish.
    pub async fn settled<V>(&self, key: &ResourceKey) -> Option<CacheEntry<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.cache.settled(key).await
    }

    pub fn subscribe<L>(&self, key: &ResourceKey, listener: L) -> Subscription
    where
        L: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.cache.subscribe(key, listener)
    }

    /// Subscribe to the enrichment status of `person_id` and poll it while
    /// the enrichment job is processing.
    pub fn watch_enrichment<L>(&self, person_id: PersonId, listener: L) -> Subscription
    where
        L: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let key = keys::enrichment_status(person_id);
        let subscription = self.cache.subscribe(&key, listener);
        let _ = self.enrichment_status(person_id);
        self.polling
            .attach(&key, enrichment_status_rule(self.tuning.enrichment_status_poll));
        subscription
    }

    /// Open the interview view of `person_id`: subscribe to its chat
    /// history, poll it, and start the chat when the history is empty.
    pub fn open_interview<L>(&self, person_id: PersonId, listener: L) -> InterviewSession
    where
        L: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let key = keys::chat_history(person_id);
        let history = self.cache.subscribe(&key, listener);
        let initializer = self.chat_initializer(person_id);
        let init = initializer.attach(&self.cache, &key);
        let _ = self.chat_history(person_id);
        self.polling
            .attach(&key, chat_history_rule(self.tuning.chat_history_poll));
        InterviewSession {
            initializer,
            _history: history,
            _init: init,
        }
    }

    /// A chat initializer whose start call goes through the dispatcher with
    /// the chat-start retry policy.
    pub fn chat_initializer(&self, person_id: PersonId) -> ChatInitializer {
        let dispatcher = self.dispatcher.clone();
        let mutation = mutations::start_chat(&self.client, self.tuning.chat_start_retry);
        ChatInitializer::new(self.tuning.settle_delay, move || {
            let dispatcher = dispatcher.clone();
            let mutation = mutation.clone();
            async move { dispatcher.mutate(&mutation, person_id).await.map(|_| ()) }
        })
    }

    pub async fn create_person(&self, body: PersonCreate) -> Result<PersonResponse, ApiError> {
        self.dispatcher
            .mutate(&mutations::create_person(&self.client), body)
            .await
    }

    pub async fn extend_person(
        &self,
        person_id: PersonId,
        body: PersonExtend,
    ) -> Result<PersonResponse, ApiError> {
        self.dispatcher
            .mutate(&mutations::extend_person(&self.client), (person_id, body))
            .await
    }

    pub async fn start_chat(&self, person_id: PersonId) -> Result<ChatResponse, ApiError> {
        let mutation = mutations::start_chat(&self.client, self.tuning.chat_start_retry);
        self.dispatcher.mutate(&mutation, person_id).await
    }

    pub async fn send_message(
        &self,
        person_id: PersonId,
        message: impl Into<String>,
    ) -> Result<ChatResponse, ApiError> {
        self.dispatcher
            .mutate(&mutations::send_message(&self.client), (person_id, message.into()))
            .await
    }

    pub async fn trigger_enrichment(&self, person_id: PersonId) -> Result<ActionResponse, ApiError> {
        self.dispatcher
            .mutate(&mutations::trigger_enrichment(&self.client), person_id)
            .await
    }

    pub async fn refresh_enrichment(&self, person_id: PersonId) -> Result<ActionResponse, ApiError> {
        self.dispatcher
            .mutate(&mutations::refresh_enrichment(&self.client), person_id)
            .await
    }

    pub async fn prepare_interview(
        &self,
        person_id: PersonId,
        force: bool,
    ) -> Result<ActionResponse, ApiError> {
        self.dispatcher
            .mutate(&mutations::prepare_interview(&self.client), (person_id, force))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn client() -> ApiClient {
        ApiClient::with_client(reqwest::Client::new(), "http://127.0.0.1:9")
    }

    fn chat_reply() -> ChatResponse {
        ChatResponse {
            agent_reply: "Hi".into(),
            progress: 0.0,
            turn_count: 1,
            is_complete: false,
        }
    }

    fn action() -> ActionResponse {
        ActionResponse {
            status: Some("queued".into()),
            message: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn test_send_message_invalidates_history_and_candidate() {
        let set = mutations::send_message(&client()).invalidation_set(&(4, "hi".into()), &chat_reply());
        assert!(set.matches(&keys::chat_history(4)));
        assert!(set.matches(&keys::candidate(4)));
        assert!(!set.matches(&keys::chat_history(5)));
        assert!(!set.matches(&keys::dashboard(1, true)));
    }

    #[test]
    fn test_trigger_enrichment_invalidates_every_dashboard() {
        let set = mutations::trigger_enrichment(&client()).invalidation_set(&9, &action());
        for key in [
            keys::enrichment_status(9),
            keys::candidate_status(9),
            keys::candidate(9),
            keys::scoring_analysis(9),
            keys::dashboard(1, true),
            keys::dashboard(2, false),
        ] {
            assert!(set.matches(&key), "{} should be invalidated", key);
        }
        assert!(!set.matches(&keys::interview_readiness(9)));
    }

    #[test]
    fn test_refresh_enrichment_invalidates_insights() {
        let set = mutations::refresh_enrichment(&client()).invalidation_set(&3, &action());
        assert!(set.matches(&keys::social_intelligence(3)));
        assert!(set.matches(&keys::professional_summary(3)));
        assert!(set.matches(&keys::hr_recommendations(3)));
        assert!(set.matches(&keys::candidate(3)));
        assert!(!set.matches(&keys::enrichment_status(3)));
    }

    #[test]
    fn test_prepare_interview_and_start_chat_sets() {
        let set = mutations::prepare_interview(&client()).invalidation_set(&(2, true), &action());
        assert!(set.matches(&keys::interview_readiness(2)));
        assert!(set.matches(&keys::candidate_status(2)));
        assert_eq!(set.patterns().len(), 2);

        let start = mutations::start_chat(&client(), QueryTuning::default().chat_start_retry);
        assert_eq!(start.retry().max_retries, 3);
        let set = start.invalidation_set(&2, &chat_reply());
        assert!(set.matches(&keys::chat_history(2)));
        assert_eq!(set.patterns().len(), 1);
    }

    #[test]
    fn test_create_person_invalidates_dashboards_only() {
        let body = PersonCreate {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: None,
            job_id: 1,
        };
        let set = mutations::create_person(&client()).invalidation_set(&body, &sample_person());
        assert_eq!(set.patterns(), &[KeyPattern::Kind(ResourceKind::Dashboard)]);
    }

    fn sample_person() -> PersonResponse {
        PersonResponse {
            id: 1,
            upstream_person_id: None,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: None,
            job_id: 1,
            skills_tags: Vec::new(),
            resume_text: None,
            intro: None,
            why_us: None,
            linkedin: None,
            github: None,
            avatar_url: None,
            trust_score: None,
            social_verification_status: None,
            created_ts: "2024-05-01T10:00:00Z".into(),
            last_chat_ts: None,
        }
    }

    #[test]
    fn test_dashboard_keys_differ_by_param() {
        assert_ne!(keys::dashboard(1, true), keys::dashboard(1, false));
        assert!(KeyPattern::Kind(ResourceKind::Dashboard).matches(&keys::dashboard(1, false)));
    }
}
