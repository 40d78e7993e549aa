//! Request and response bodies of the hiring-platform API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type PersonId = u64;
pub type JobId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub database: String,
    pub upstream_api: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: JobId,
    pub title: String,
    pub company: String,
    pub location: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub salary: Option<String>,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    pub posted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonCreate {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub job_id: JobId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonExtend {
    pub job_id: JobId,
    pub resume_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why_us: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonResponse {
    pub id: PersonId,
    pub upstream_person_id: Option<u64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub job_id: JobId,
    #[serde(default)]
    pub skills_tags: Vec<String>,
    pub resume_text: Option<String>,
    pub intro: Option<String>,
    pub why_us: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub avatar_url: Option<String>,
    pub trust_score: Option<f64>,
    pub social_verification_status: Option<String>,
    pub created_ts: String,
    pub last_chat_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Ai,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnIntent {
    SkillProbe,
    Motivation,
    Trap,
    Values,
    Scenario,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurnResponse {
    pub id: u64,
    pub turn_index: u32,
    pub role: TurnRole,
    pub intent: TurnIntent,
    pub content: String,
    pub analysis_json: Option<Value>,
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub agent_reply: String,
    pub progress: f64,
    pub turn_count: u32,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub person_id: PersonId,
    #[serde(default)]
    pub turns: Vec<ChatTurnResponse>,
    pub total_turns: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignalsResponse {
    pub consistency_score: f64,
    pub depth_score: f64,
    pub motivation_alignment: f64,
    pub culture_alignment: f64,
    pub turnover_risk: f64,
    pub data_confidence: f64,
    pub credibility_flag: bool,
    #[serde(default)]
    pub flags: Vec<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitBucket {
    Top,
    Borderline,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScoreResponse {
    pub fit_score: f64,
    pub fit_bucket: FitBucket,
    pub computed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSkillMatch {
    pub skill_name: String,
    pub required_level: Option<String>,
    pub candidate_level: Option<String>,
    pub is_mandatory: bool,
    pub match_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProfile {
    pub id: JobId,
    pub title: String,
    pub description: Option<String>,
    pub role_level: String,
    #[serde(default)]
    pub technical_focus: Vec<String>,
    #[serde(default)]
    pub growth_opportunities: Vec<String>,
    pub analyzed_skills: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub location: Option<Value>,
    pub industry_insights: Option<Value>,
    pub company_size_estimate: Option<String>,
    #[serde(default)]
    pub business_focus: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProfileResponse {
    pub job: JobProfile,
    pub company: CompanyProfile,
    #[serde(default)]
    pub personalization_context: Value,
    #[serde(default)]
    pub interview_focus: Value,
    #[serde(default)]
    pub cultural_indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullCandidateResponse {
    pub person: PersonResponse,
    pub signals: Option<CandidateSignalsResponse>,
    pub score: Option<CandidateScoreResponse>,
    #[serde(default)]
    pub chat_history: Vec<ChatTurnResponse>,
    #[serde(default)]
    pub job_skills: Vec<JobSkillMatch>,
    pub job_profile: Option<JobProfileResponse>,
    pub upstream_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardCandidate {
    pub person_id: PersonId,
    pub full_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub fit_score: f64,
    pub fit_bucket: FitBucket,
    pub turnover_risk: f64,
    #[serde(default)]
    pub flags: Vec<String>,
    pub github_username: Option<String>,
    pub linkedin_url: Option<String>,
    pub trust_score: Option<f64>,
    pub social_verification_status: Option<String>,
    pub professional_insights: Option<Value>,
    #[serde(default)]
    pub risk_indicators: Vec<String>,
    pub applied_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub job_id: JobId,
    pub job_title: String,
    #[serde(default)]
    pub candidates: Vec<DashboardCandidate>,
    pub total_count: u32,
    pub high_fit_count: u32,
}

/// Status of the background enrichment job of one applicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    NotStarted,
    Processing,
    Verified,
    NeedsReview,
    Unverified,
    Failed,
}

impl EnrichmentState {
    /// The job finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EnrichmentState::NotStarted | EnrichmentState::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentStatusResponse {
    pub person_id: PersonId,
    pub enrichment_status: EnrichmentState,
    pub trust_score: Option<f64>,
    #[serde(default)]
    pub has_enrichment_data: bool,
    #[serde(default)]
    pub status_descriptions: HashMap<String, String>,
    pub estimated_completion: Option<String>,
}

/// Composite status of the enrichment, interview and scoring stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStatusResponse {
    pub person_id: PersonId,
    pub enrichment_status: Option<EnrichmentState>,
    pub interview_status: Option<String>,
    pub scoring_status: Option<String>,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewReadinessResponse {
    pub person_id: PersonId,
    pub ready: bool,
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub details: Value,
}

/// Body of action endpoints whose payload this client only passes through
/// (trigger-enrichment, prepare-interview, refresh-enrichment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}
