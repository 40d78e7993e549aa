//! HTTP request client for the hiring-platform API.
//!
//! Every call returns `Result<T, ApiError>`. Non-success responses are
//! normalized into a single message extracted from the error body.

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::types::{
    ActionResponse, CandidateStatusResponse, ChatHistory, ChatMessage, ChatResponse,
    DashboardResponse, EnrichmentStatusResponse, FullCandidateResponse, HealthResponse,
    InterviewReadinessResponse, JobId, JobProfileResponse, JobResponse, PersonCreate,
    PersonExtend, PersonId, PersonResponse,
};

/// Path builders for every endpoint, relative to the base URL.
pub mod endpoints {
    use crate::types::{JobId, PersonId};

    pub fn health() -> String {
        "/health".to_string()
    }
    pub fn jobs() -> String {
        "/jobs".to_string()
    }
    pub fn create_person() -> String {
        "/person".to_string()
    }
    pub fn extend_person(id: PersonId) -> String {
        format!("/person/{}/extend", id)
    }
    pub fn enrichment_status(id: PersonId) -> String {
        format!("/person/{}/enrichment-status", id)
    }
    pub fn start_chat(id: PersonId) -> String {
        format!("/chat/{}/start", id)
    }
    pub fn chat(id: PersonId) -> String {
        format!("/chat/{}", id)
    }
    pub fn chat_history(id: PersonId) -> String {
        format!("/chat/{}/history", id)
    }
    pub fn dashboard(job_id: JobId, include_borderline: bool) -> String {
        format!("/dashboard/{}?include_borderline={}", job_id, include_borderline)
    }
    pub fn candidate(id: PersonId) -> String {
        format!("/candidate/{}/full", id)
    }
    pub fn candidate_status(id: PersonId) -> String {
        format!("/candidate/{}/status", id)
    }
    pub fn trigger_enrichment(id: PersonId) -> String {
        format!("/candidate/{}/trigger-enrichment", id)
    }
    pub fn interview_readiness(id: PersonId) -> String {
        format!("/candidate/{}/interview-readiness", id)
    }
    pub fn prepare_interview(id: PersonId, force: bool) -> String {
        format!("/candidate/{}/prepare-interview?force={}", id, force)
    }
    pub fn scoring_analysis(id: PersonId) -> String {
        format!("/candidate/{}/scoring-analysis", id)
    }
    pub fn job_profile(job_id: JobId) -> String {
        format!("/job-profile/{}", job_id)
    }
    pub fn job_profile_context(job_id: JobId) -> String {
        format!("/job-profile/{}/context", job_id)
    }
    pub fn job_skills_analysis(job_id: JobId) -> String {
        format!("/job-profile/{}/skills-analysis", job_id)
    }
    pub fn social_intelligence(id: PersonId) -> String {
        format!("/insights/{}/social-intelligence", id)
    }
    pub fn professional_summary(id: PersonId) -> String {
        format!("/insights/{}/professional-summary", id)
    }
    pub fn hr_recommendations(id: PersonId) -> String {
        format!("/insights/{}/hr-recommendations", id)
    }
    pub fn refresh_enrichment(id: PersonId) -> String {
        format!("/insights/{}/refresh-enrichment", id)
    }
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ApiError::network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, &config.base_url))
    }

    /// Use an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        self.get_json(&endpoints::health()).await
    }

    pub async fn jobs(&self) -> Result<Vec<JobResponse>, ApiError> {
        self.get_json(&endpoints::jobs()).await
    }

    pub async fn create_person(&self, person: &PersonCreate) -> Result<PersonResponse, ApiError> {
        self.post_json(&endpoints::create_person(), Some(person)).await
    }

    pub async fn extend_person(
        &self,
        person_id: PersonId,
        data: &PersonExtend,
    ) -> Result<PersonResponse, ApiError> {
        self.post_json(&endpoints::extend_person(person_id), Some(data))
            .await
    }

    pub async fn enrichment_status(
        &self,
        person_id: PersonId,
    ) -> Result<EnrichmentStatusResponse, ApiError> {
        self.get_json(&endpoints::enrichment_status(person_id)).await
    }

    pub async fn start_chat(&self, person_id: PersonId) -> Result<ChatResponse, ApiError> {
        self.post_json::<_, ()>(&endpoints::start_chat(person_id), None)
            .await
    }

    pub async fn send_message(
        &self,
        person_id: PersonId,
        message: &str,
    ) -> Result<ChatResponse, ApiError> {
        let body = ChatMessage {
            message: message.to_string(),
        };
        self.post_json(&endpoints::chat(person_id), Some(&body)).await
    }

    pub async fn chat_history(&self, person_id: PersonId) -> Result<ChatHistory, ApiError> {
        self.get_json(&endpoints::chat_history(person_id)).await
    }

    pub async fn dashboard(
        &self,
        job_id: JobId,
        include_borderline: bool,
    ) -> Result<DashboardResponse, ApiError> {
        self.get_json(&endpoints::dashboard(job_id, include_borderline))
            .await
    }

    pub async fn candidate(&self, person_id: PersonId) -> Result<FullCandidateResponse, ApiError> {
        self.get_json(&endpoints::candidate(person_id)).await
    }

    pub async fn candidate_status(
        &self,
        person_id: PersonId,
    ) -> Result<CandidateStatusResponse, ApiError> {
        self.get_json(&endpoints::candidate_status(person_id)).await
    }

    pub async fn trigger_enrichment(&self, person_id: PersonId) -> Result<ActionResponse, ApiError> {
        self.post_json::<_, ()>(&endpoints::trigger_enrichment(person_id), None)
            .await
    }

    pub async fn interview_readiness(
        &self,
        person_id: PersonId,
    ) -> Result<InterviewReadinessResponse, ApiError> {
        self.get_json(&endpoints::interview_readiness(person_id))
            .await
    }

    pub async fn prepare_interview(
        &self,
        person_id: PersonId,
        force: bool,
    ) -> Result<ActionResponse, ApiError> {
        self.post_json::<_, ()>(&endpoints::prepare_interview(person_id, force), None)
            .await
    }

    pub async fn scoring_analysis(&self, person_id: PersonId) -> Result<serde_json::Value, ApiError> {
        self.get_json(&endpoints::scoring_analysis(person_id)).await
    }

    pub async fn job_profile(&self, job_id: JobId) -> Result<JobProfileResponse, ApiError> {
        self.get_json(&endpoints::job_profile(job_id)).await
    }

    pub async fn job_profile_context(&self, job_id: JobId) -> Result<serde_json::Value, ApiError> {
        self.get_json(&endpoints::job_profile_context(job_id)).await
    }

    pub async fn job_skills_analysis(&self, job_id: JobId) -> Result<serde_json::Value, ApiError> {
        self.get_json(&endpoints::job_skills_analysis(job_id)).await
    }

    pub async fn social_intelligence(&self, person_id: PersonId) -> Result<serde_json::Value, ApiError> {
        self.get_json(&endpoints::social_intelligence(person_id))
            .await
    }

    pub async fn professional_summary(
        &self,
        person_id: PersonId,
    ) -> Result<serde_json::Value, ApiError> {
        self.get_json(&endpoints::professional_summary(person_id))
            .await
    }

    pub async fn hr_recommendations(&self, person_id: PersonId) -> Result<serde_json::Value, ApiError> {
        self.get_json(&endpoints::hr_recommendations(person_id))
            .await
    }

    pub async fn refresh_enrichment(&self, person_id: PersonId) -> Result<ActionResponse, ApiError> {
        self.post_json::<_, ()>(&endpoints::refresh_enrichment(person_id), None)
            .await
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(url).send().await.map_err(|e| {
            tracing::error!(target: "hire_query::client", path, error = %e, "request failed");
            ApiError::from(e)
        })?;
        parse_response(path, response).await
    }

    async fn post_json<T, B>(&self, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| {
            tracing::error!(target: "hire_query::client", path, error = %e, "request failed");
            ApiError::from(e)
        })?;
        parse_response(path, response).await
    }
}

async fn parse_response<T: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let text = response.text().await.map_err(ApiError::from)?;
    if status.is_success() {
        return serde_json::from_str(&text).map_err(|e| {
            tracing::error!(target: "hire_query::client", path, error = %e, "undecodable response body");
            ApiError::from(e)
        });
    }
    let err = ApiError::from_status(status.as_u16(), error_message(status, &text));
    tracing::error!(target: "hire_query::client", path, error = %err, "request rejected");
    Err(err)
}

/// Extract a human-readable message from an error body.
///
/// Tries the JSON fields `detail`, `error` and `message` in that order, then
/// the raw body, then the status line.
pub fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(serde_json::Value::Object(fields)) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "error", "message"] {
            match fields.get(field) {
                Some(serde_json::Value::String(message)) if !message.is_empty() => {
                    return message.clone();
                }
                Some(value @ (serde_json::Value::Array(_) | serde_json::Value::Object(_))) => {
                    return value.to_string();
                }
                _ => {}
            }
        }
    }
    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    format!(
        "HTTP {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .trim_end()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_detail() {
        let body = r#"{"error": "Bad", "detail": "Person 9 not found"}"#;
        assert_eq!(error_message(StatusCode::NOT_FOUND, body), "Person 9 not found");
    }

    #[test]
    fn test_error_message_falls_back_to_error_then_message() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"error": "invalid email"}"#),
            "invalid email"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"message": "nope"}"#),
            "nope"
        );
    }

    #[test]
    fn test_error_message_structured_detail() {
        let body = r#"{"detail": [{"loc": ["body", "email"], "msg": "field required"}]}"#;
        assert!(error_message(StatusCode::UNPROCESSABLE_ENTITY, body).contains("field required"));
    }

    #[test]
    fn test_error_message_raw_text_and_status_line() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream timeout"),
            "upstream timeout"
        );
        assert_eq!(
            error_message(StatusCode::SERVICE_UNAVAILABLE, ""),
            "HTTP 503 Service Unavailable"
        );
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(endpoints::dashboard(4, true), "/dashboard/4?include_borderline=true");
        assert_eq!(
            endpoints::prepare_interview(2, false),
            "/candidate/2/prepare-interview?force=false"
        );
        assert_eq!(endpoints::enrichment_status(8), "/person/8/enrichment-status");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ApiClient::with_client(reqwest::Client::new(), "http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
    }
}
