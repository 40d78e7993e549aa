//! Resource keys, key patterns and invalidation sets.

use std::fmt;
use std::str::FromStr;

/// The kind of remote resource a key refers to.
///
/// Staleness, retry and polling policies are configured per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Health,
    Jobs,
    Dashboard,
    Candidate,
    CandidateStatus,
    EnrichmentStatus,
    ChatHistory,
    InterviewReadiness,
    ScoringAnalysis,
    JobProfile,
    JobProfileContext,
    JobSkillsAnalysis,
    SocialIntelligence,
    ProfessionalSummary,
    HrRecommendations,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 15] = [
        ResourceKind::Health,
        ResourceKind::Jobs,
        ResourceKind::Dashboard,
        ResourceKind::Candidate,
        ResourceKind::CandidateStatus,
        ResourceKind::EnrichmentStatus,
        ResourceKind::ChatHistory,
        ResourceKind::InterviewReadiness,
        ResourceKind::ScoringAnalysis,
        ResourceKind::JobProfile,
        ResourceKind::JobProfileContext,
        ResourceKind::JobSkillsAnalysis,
        ResourceKind::SocialIntelligence,
        ResourceKind::ProfessionalSummary,
        ResourceKind::HrRecommendations,
    ];

    /// Snake-case name, used in config files and in key display.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Health => "health",
            ResourceKind::Jobs => "jobs",
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::Candidate => "candidate",
            ResourceKind::CandidateStatus => "candidate_status",
            ResourceKind::EnrichmentStatus => "enrichment_status",
            ResourceKind::ChatHistory => "chat_history",
            ResourceKind::InterviewReadiness => "interview_readiness",
            ResourceKind::ScoringAnalysis => "scoring_analysis",
            ResourceKind::JobProfile => "job_profile",
            ResourceKind::JobProfileContext => "job_profile_context",
            ResourceKind::JobSkillsAnalysis => "job_skills_analysis",
            ResourceKind::SocialIntelligence => "social_intelligence",
            ResourceKind::ProfessionalSummary => "professional_summary",
            ResourceKind::HrRecommendations => "hr_recommendations",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{}'", s))
    }
}

/// Identifies one cacheable fetch: kind, optional entity id and ordered
/// query parameters. Two keys are equal iff all components are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    kind: ResourceKind,
    id: Option<String>,
    params: Vec<(String, String)>,
}

impl ResourceKey {
    /// Key for a collection or singleton resource.
    pub fn new(kind: ResourceKind) -> Self {
        ResourceKey {
            kind,
            id: None,
            params: Vec::new(),
        }
    }

    /// Key for a single entity of `kind`.
    pub fn entity(kind: ResourceKind, id: impl fmt::Display) -> Self {
        ResourceKey {
            kind,
            id: Some(id.to_string()),
            params: Vec::new(),
        }
    }

    /// Append a query parameter. Order matters for equality.
    pub fn with_param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Format: `{kind}::{id}?{name}={value}&...`
impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(id) = &self.id {
            write!(f, "::{}", id)?;
        }
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}

/// Matches cache keys for invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    /// Exactly this key.
    Exact(ResourceKey),
    /// Every key of this kind, whatever its id or params.
    Kind(ResourceKind),
    /// Every key of this kind with this id, whatever its params.
    Entity(ResourceKind, String),
}

impl KeyPattern {
    pub fn matches(&self, key: &ResourceKey) -> bool {
        match self {
            KeyPattern::Exact(exact) => exact == key,
            KeyPattern::Kind(kind) => key.kind == *kind,
            KeyPattern::Entity(kind, id) => key.kind == *kind && key.id.as_deref() == Some(id),
        }
    }
}

impl From<ResourceKey> for KeyPattern {
    fn from(key: ResourceKey) -> Self {
        KeyPattern::Exact(key)
    }
}

impl From<ResourceKind> for KeyPattern {
    fn from(kind: ResourceKind) -> Self {
        KeyPattern::Kind(kind)
    }
}

/// The keys a mutation declares outdated once it succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationSet {
    patterns: Vec<KeyPattern>,
}

impl InvalidationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern; duplicates are ignored.
    pub fn with(mut self, pattern: impl Into<KeyPattern>) -> Self {
        let pattern = pattern.into();
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
        self
    }

    pub fn patterns(&self) -> &[KeyPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, key: &ResourceKey) -> bool {
        self.patterns.iter().any(|p| p.matches(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = ResourceKey::entity(ResourceKind::Dashboard, 7).with_param("include_borderline", true);
        assert_eq!(key.to_string(), "dashboard::7?include_borderline=true");
        assert_eq!(ResourceKey::new(ResourceKind::Jobs).to_string(), "jobs");
    }

    #[test]
    fn test_key_equality_includes_params() {
        let a = ResourceKey::entity(ResourceKind::Dashboard, 7).with_param("include_borderline", false);
        let b = ResourceKey::entity(ResourceKind::Dashboard, 7).with_param("include_borderline", true);
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_patterns() {
        let key = ResourceKey::entity(ResourceKind::Dashboard, 3).with_param("include_borderline", true);
        assert!(KeyPattern::Kind(ResourceKind::Dashboard).matches(&key));
        assert!(KeyPattern::Entity(ResourceKind::Dashboard, "3".into()).matches(&key));
        assert!(!KeyPattern::Entity(ResourceKind::Dashboard, "4".into()).matches(&key));
        assert!(!KeyPattern::Exact(ResourceKey::entity(ResourceKind::Dashboard, 3)).matches(&key));
        assert!(!KeyPattern::Kind(ResourceKind::Candidate).matches(&key));
    }

    #[test]
    fn test_invalidation_set_dedups() {
        let set = InvalidationSet::new()
            .with(ResourceKind::Dashboard)
            .with(ResourceKind::Dashboard)
            .with(ResourceKey::entity(ResourceKind::Candidate, 1));
        assert_eq!(set.patterns().len(), 2);
        assert!(set.matches(&ResourceKey::entity(ResourceKind::Candidate, 1)));
        assert!(!set.matches(&ResourceKey::entity(ResourceKind::Candidate, 2)));
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
        }
        assert!("nope".parse::<ResourceKind>().is_err());
    }
}
