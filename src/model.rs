//! Records owned by the ground-truth store and the statuses the decision
//! gate produces.
//!
//! Episodes, facts and coverage records are immutable once written. Coverage
//! is append-only: a question becoming satisfied writes a new record, it
//! never rewrites an old one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EpisodeId, FactId, SessionId};
use crate::normalize::normalize;

/// An ingested, summarized source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub topic: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Summary text.
    pub notes: String,
    pub outcome: String,
    #[serde(default)]
    pub tags: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Input for [`crate::storage::EpisodeStore::insert`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewEpisode {
    pub topic: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub notes: String,
    pub outcome: String,
    pub tags: String,
    pub session_id: Option<SessionId>,
}

impl NewEpisode {
    /// Creates an episode with `unknown` outcome and no tags.
    #[must_use]
    pub fn new(topic: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            notes: notes.into(),
            outcome: "unknown".to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = outcome.into();
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }

    #[must_use]
    pub fn in_session(mut self, session: SessionId) -> Self {
        self.session_id = Some(session);
        self
    }
}

/// A subject/predicate/object claim extracted from an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub topic: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    #[serde(default)]
    pub source_episode_id: Option<EpisodeId>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Input for [`crate::storage::FactStore::insert`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewFact {
    pub topic: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub source_episode_id: Option<EpisodeId>,
    pub source_url: Option<String>,
    pub session_id: Option<SessionId>,
}

impl NewFact {
    /// Default confidence when the caller does not supply one.
    pub const DEFAULT_CONFIDENCE: f32 = 0.7;

    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: Self::DEFAULT_CONFIDENCE,
            source_episode_id: None,
            source_url: None,
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn from_episode(mut self, episode: EpisodeId, url: Option<String>) -> Self {
        self.source_episode_id = Some(episode);
        self.source_url = url;
        self
    }

    #[must_use]
    pub fn in_session(mut self, session: SessionId) -> Self {
        self.session_id = Some(session);
        self
    }
}

/// Cached assertion that a topic + sub-question was answered by specific evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub topic: String,
    /// Raw sub-question text as it was asked.
    pub subquestion: String,
    /// `normalize(subquestion)` at write time. Legacy rows may lack it.
    #[serde(default)]
    pub normalized_subquestion: Option<String>,
    pub episode_ids: Vec<EpisodeId>,
    pub fact_ids: Vec<FactId>,
    pub created_at: DateTime<Utc>,
}

impl CoverageRecord {
    /// Maximum number of episode ids kept on a record.
    pub const MAX_EPISODE_IDS: usize = 10;
    /// Maximum number of fact ids kept on a record.
    pub const MAX_FACT_IDS: usize = 25;

    /// The key used for fuzzy matching, normalizing legacy rows on the fly.
    #[must_use]
    pub fn match_key(&self) -> String {
        match self.normalized_subquestion.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => normalize(&self.subquestion),
        }
    }

    /// Whole days elapsed between `created_at` and `now`.
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// Freshness is evaluated at read time: strictly older than the window is stale.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, freshness_days: i64) -> bool {
        self.age_days(now) > freshness_days
    }
}

/// Input for [`crate::storage::CoverageStore::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCoverage {
    pub topic: String,
    pub subquestion: String,
    pub normalized_subquestion: String,
    pub episode_ids: Vec<EpisodeId>,
    pub fact_ids: Vec<FactId>,
    pub created_at: DateTime<Utc>,
}

impl NewCoverage {
    /// Builds a record input, normalizing the question and capping the id lists.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        subquestion: impl Into<String>,
        mut episode_ids: Vec<EpisodeId>,
        mut fact_ids: Vec<FactId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let subquestion = subquestion.into();
        episode_ids.truncate(CoverageRecord::MAX_EPISODE_IDS);
        fact_ids.truncate(CoverageRecord::MAX_FACT_IDS);
        Self {
            topic: topic.into(),
            normalized_subquestion: normalize(&subquestion),
            subquestion,
            episode_ids,
            fact_ids,
            created_at,
        }
    }
}

/// Classification of a sub-question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Satisfied,
    Missing,
    Stale,
    Contradictory,
}

impl Status {
    /// Parses the wire form used by the evaluator (`satisfied|missing|stale|contradictory`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "satisfied" => Some(Self::Satisfied),
            "missing" => Some(Self::Missing),
            "stale" => Some(Self::Stale),
            "contradictory" => Some(Self::Contradictory),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Satisfied => "satisfied",
            Self::Missing => "missing",
            Self::Stale => "stale",
            Self::Contradictory => "contradictory",
        }
    }

    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a status came from. Only evaluator-produced satisfied statuses are
/// persisted as new coverage; cache hits already have a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusOrigin {
    CoverageCache,
    Evaluator,
    EvaluatorFallback,
    WebResearch,
}

/// Per-question verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubquestionStatus {
    pub question: String,
    pub status: Status,
    #[serde(default)]
    pub rationale: String,
    pub origin: StatusOrigin,
}

impl SubquestionStatus {
    #[must_use]
    pub fn new(
        question: impl Into<String>,
        status: Status,
        rationale: impl Into<String>,
        origin: StatusOrigin,
    ) -> Self {
        Self {
            question: question.into(),
            status,
            rationale: rationale.into(),
            origin,
        }
    }

    /// A cache hit against an earlier coverage record.
    #[must_use]
    pub fn previously_covered(question: impl Into<String>, record: &CoverageRecord) -> Self {
        Self::new(
            question,
            Status::Satisfied,
            format!(
                "Previously covered on {} (matched: {})",
                record.created_at.format("%Y-%m-%d %H:%M:%S"),
                record.subquestion
            ),
            StatusOrigin::CoverageCache,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    fn record_at(created_at: DateTime<Utc>) -> CoverageRecord {
        CoverageRecord {
            topic: "Topic".to_string(),
            subquestion: "What are the key trends?".to_string(),
            normalized_subquestion: None,
            episode_ids: vec![],
            fact_ids: vec![],
            created_at,
        }
    }

    #[test]
    fn freshness_boundary_is_strictly_greater_than() {
        let now = Utc::now();
        let at_window = record_at(now - Duration::days(180));
        assert_eq!(at_window.age_days(now), 180);
        assert!(!at_window.is_stale(now, 180));

        let past_window = record_at(now - Duration::days(181));
        assert!(past_window.is_stale(now, 180));
    }

    #[test]
    fn same_record_can_be_fresh_or_stale_depending_on_policy() {
        let now = Utc::now();
        let record = record_at(now - Duration::days(10));
        assert!(!record.is_stale(now, 180));
        assert!(record.is_stale(now, 1));
    }

    #[test]
    fn legacy_rows_are_normalized_on_read() {
        let record = record_at(Utc::now());
        assert_eq!(record.match_key(), "trends");
    }

    #[test]
    fn new_coverage_caps_id_lists() {
        let eps = (1..=15).map(EpisodeId).collect();
        let facts = (1..=40).map(FactId).collect();
        let cov = NewCoverage::new("T", "What is X?", eps, facts, Utc::now());
        assert_eq!(cov.episode_ids.len(), CoverageRecord::MAX_EPISODE_IDS);
        assert_eq!(cov.fact_ids.len(), CoverageRecord::MAX_FACT_IDS);
        assert_eq!(cov.episode_ids[0], EpisodeId(1));
        assert_eq!(cov.normalized_subquestion, "x");
    }

    #[test]
    fn status_wire_form() {
        assert_eq!(Status::parse(" Satisfied "), Some(Status::Satisfied));
        assert_eq!(Status::parse("contradictory"), Some(Status::Contradictory));
        assert_eq!(Status::parse("unknown"), None);
        let json = serde_json::to_string(&Status::Stale).unwrap();
        assert_eq!(json, "\"stale\"");
    }

    #[test]
    fn previously_covered_rationale_names_match() {
        let record = record_at(Utc::now());
        let status = SubquestionStatus::previously_covered("Q", &record);
        assert!(status.status.is_satisfied());
        assert!(status.rationale.contains("Previously covered"));
        assert!(status.rationale.contains("What are the key trends?"));
    }
}
