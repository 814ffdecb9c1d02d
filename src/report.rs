//! Cited report generation.
//!
//! A report is scoped to one (topic, session). Evidence is selected from the
//! ground-truth store, the allowed references are derived from exactly that
//! evidence, and the drafted text is passed through the citation validator
//! before it is returned.

use serde::{Deserialize, Serialize};

use crate::citation::{validate, ValidatedReport};
use crate::completion::{non_empty_text, CompletionRequest, CompletionService, Purpose};
use crate::config::ReportSection;
use crate::error::{GateResult, ValidationError};
use crate::ids::SessionId;
use crate::model::{Episode, Fact};
use crate::selector::{select_episodes, select_facts, AllowedUrlSet};
use crate::similarity::{retrieve, RetrievalLimits, SimilarityIndex};
use crate::storage::Stores;

pub const DEFAULT_MAX_EPISODES: usize = 5;
pub const DEFAULT_MAX_FACTS: usize = 15;

/// Shown when no procedural hit exists.
pub const FALLBACK_SKILL: &str = "General Research Report";

const REPORT_TEMPERATURE: f32 = 0.3;

const SYSTEM_PROMPT: &str = "You are an advanced research assistant. Write a comprehensive, well-structured report based ONLY on the provided context.\n\
You may ONLY cite URLs from the Allowed References list provided below.\n\
Do not invent information or citations not present in the context.\n\
Prioritize evidence and facts over narrative fluff.";

/// Result of a report request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    /// No session was given and the topic has none.
    NoSession,
    /// The selected evidence carries no urls.
    NoSources,
    GenerationFailed {
        reason: String,
    },
    Generated {
        session_id: SessionId,
        text: String,
        redactions: usize,
        allowed_urls: Vec<String>,
    },
}

impl ReportOutcome {
    /// Text to show a user for this outcome.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::NoSession => "No session found for this topic.".to_string(),
            Self::NoSources => {
                "No topic-scoped ingested sources available to generate a cited report for this topic.".to_string()
            }
            Self::GenerationFailed { reason } => format!("Error generating report: {reason}"),
            Self::Generated { text, .. } => text.clone(),
        }
    }
}

/// Evidence a report is written from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportEvidence {
    pub episodes: Vec<Episode>,
    pub facts: Vec<Fact>,
    pub allowed: AllowedUrlSet,
    pub skill: Option<String>,
}

/// Splits notes into sentence bullets.
fn note_bullets(notes: &str) -> Vec<String> {
    notes
        .replace('\n', " ")
        .split(". ")
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds the user prompt for the report draft.
#[must_use]
pub fn report_prompt(topic: &str, evidence: &ReportEvidence) -> String {
    let skill = evidence.skill.as_deref().unwrap_or(FALLBACK_SKILL);

    let refs = evidence.allowed.iter().map(|u| format!("- {u}")).collect::<Vec<_>>().join("\n");

    let mut facts = String::from("Key Semantic Facts:\n");
    for f in &evidence.facts {
        // A fact's own url is only shown when the report may cite it.
        let source = match f.source_url.as_deref() {
            Some(url) if evidence.allowed.contains(url) => format!("(Source: {url})"),
            _ => String::new(),
        };
        facts.push_str(&format!(
            "- {} {} {} [Confidence: {}] {}\n",
            f.subject, f.predicate, f.object, f.confidence, source
        ));
    }

    let mut episodes = String::from("Episodic Evidence (Source Notes):\n");
    for e in &evidence.episodes {
        let notes = note_bullets(&e.notes)
            .iter()
            .map(|n| format!("    * {n}"))
            .collect::<Vec<_>>()
            .join("\n");
        episodes.push_str(&format!(
            "- Title: {}\n  URL: {}\n  Evidence Notes:\n{notes}\n\n",
            e.title.as_deref().unwrap_or("Untitled"),
            e.url.as_deref().unwrap_or("No URL"),
        ));
    }

    format!(
        "Topic: {topic}\n\n\
         Selected Approach/Skill: {skill}\n\n\
         Allowed References:\n{refs}\n\n\
         {facts}\n\n\
         {episodes}\n\n\
         Instructions:\n\
         1. Write an Executive Summary.\n\
         2. List Key Findings.\n\
         3. Discuss the topic in detail, organized by sub-themes.\n\
         4. Note any Limitations.\n\
         5. Include a References section listing the URLs used.\n\
         \nSTRICT CITATION RULES:\n\
         - Do not introduce any source not explicitly listed in Allowed References.\n\
         - If you cannot support a claim with an allowed URL, label it as 'Unverified' and do not cite.\n\
         \nGenerate the report now."
    )
}

/// Generates cited reports from stored research.
pub struct ReportWriter<'a> {
    stores: &'a Stores,
    index: &'a dyn SimilarityIndex,
    completion: &'a dyn CompletionService,
}

impl<'a> ReportWriter<'a> {
    #[must_use]
    pub fn new(stores: &'a Stores, index: &'a dyn SimilarityIndex, completion: &'a dyn CompletionService) -> Self {
        Self {
            stores,
            index,
            completion,
        }
    }

    /// Resolves the session: the explicit one, else the topic's latest.
    pub fn resolve_session(&self, topic: &str, session: Option<SessionId>) -> GateResult<Option<SessionId>> {
        match session {
            Some(s) => Ok(Some(s)),
            None => {
                let latest = self.stores.episodes.latest_session(topic)?;
                tracing::debug!(topic = %topic, session = ?latest, "using latest session");
                Ok(latest)
            }
        }
    }

    /// Selects the evidence for (topic, session). Only rows of that pair can
    /// come back, whatever the similarity index ranks.
    pub fn select_evidence(
        &self,
        topic: &str,
        session: &SessionId,
        max_episodes: usize,
        max_facts: usize,
    ) -> GateResult<ReportEvidence> {
        let limits = RetrievalLimits {
            k_episodic: max_episodes,
            k_semantic: max_facts,
            ..RetrievalLimits::default()
        };
        let ctx = retrieve(self.index, topic, limits);

        let episode_pool = self
            .stores
            .episodes
            .find_by_topic_and_session(topic, session, usize::MAX)?;
        let fact_pool = self.stores.facts.find_by_topic_and_session(topic, session, usize::MAX)?;

        let episodes = select_episodes(&ctx.episodic, episode_pool, max_episodes);
        let facts = select_facts(&ctx.semantic, fact_pool, max_facts);
        let allowed = AllowedUrlSet::from_episodes(&episodes);

        Ok(ReportEvidence {
            episodes,
            facts,
            allowed,
            skill: ctx.procedural.first().map(str::to_string),
        })
    }

    /// Generates a report for `topic`.
    ///
    /// Storage failures are errors; everything else is an outcome.
    pub fn generate(
        &self,
        topic: &str,
        session: Option<SessionId>,
        max_episodes: usize,
        max_facts: usize,
    ) -> GateResult<ReportOutcome> {
        if topic.trim().is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        let Some(session) = self.resolve_session(topic, session)? else {
            return Ok(ReportOutcome::NoSession);
        };

        let evidence = self.select_evidence(topic, &session, max_episodes, max_facts)?;
        if evidence.allowed.is_empty() {
            tracing::info!(topic = %topic, session = %session, "no citable sources for report");
            return Ok(ReportOutcome::NoSources);
        }
        tracing::info!(
            topic = %topic,
            session = %session,
            episodes = evidence.episodes.len(),
            facts = evidence.facts.len(),
            allowed_urls = evidence.allowed.len(),
            "generating report"
        );

        let request = CompletionRequest::user(Purpose::Report, report_prompt(topic, &evidence))
            .with_system(SYSTEM_PROMPT)
            .with_temperature(REPORT_TEMPERATURE);
        let draft = match self.completion.complete(&request).and_then(non_empty_text) {
            Ok(draft) => draft,
            Err(err) => {
                tracing::warn!(error = %err, "report generation failed");
                return Ok(ReportOutcome::GenerationFailed {
                    reason: err.to_string(),
                });
            }
        };

        let ValidatedReport { text, redactions } = validate(&draft, &evidence.allowed);
        Ok(ReportOutcome::Generated {
            session_id: session,
            text,
            redactions,
            allowed_urls: evidence.allowed.to_vec(),
        })
    }

    /// [`ReportWriter::generate`] with the quotas of a `[report]` section.
    pub fn generate_with_quotas(
        &self,
        topic: &str,
        session: Option<SessionId>,
        quotas: &ReportSection,
    ) -> GateResult<ReportOutcome> {
        self.generate(topic, session, quotas.max_episodes, quotas.max_facts)
    }
}

impl std::fmt::Debug for ReportWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::completion::ScriptedCompletion;
    use crate::model::{NewEpisode, NewFact};
    use crate::similarity::LexicalIndex;

    #[test]
    fn notes_split_into_bullets() {
        assert_eq!(
            note_bullets("Hybrid is common. Offices shrink.\nPay varies"),
            vec!["Hybrid is common", "Offices shrink", "Pay varies"]
        );
    }

    #[test]
    fn prompt_hides_fact_urls_outside_allowed_set() {
        let stores = Stores::in_memory();
        let ep = stores
            .episodes
            .insert(NewEpisode::new("T", "n").with_url("http://a.com"))
            .unwrap();
        let allowed_fact = stores
            .facts
            .insert(NewFact::new("T", "a", "is", "b").from_episode(ep.id, Some("http://a.com".to_string())))
            .unwrap();
        let foreign_fact = stores
            .facts
            .insert(NewFact::new("T", "c", "is", "d").from_episode(ep.id, Some("http://x.com".to_string())))
            .unwrap();
        let evidence = ReportEvidence {
            allowed: AllowedUrlSet::from_episodes(std::slice::from_ref(&ep)),
            episodes: vec![ep],
            facts: vec![allowed_fact, foreign_fact],
            skill: None,
        };
        let prompt = report_prompt("T", &evidence);
        assert!(prompt.contains("(Source: http://a.com)"));
        assert!(!prompt.contains("http://x.com"));
        assert!(prompt.contains("Selected Approach/Skill: General Research Report"));
    }

    #[test]
    fn no_session_and_no_sources() {
        let stores = Stores::in_memory();
        let index = LexicalIndex::new();
        let completion = ScriptedCompletion::new();
        let writer = ReportWriter::new(&stores, &index, &completion);

        let out = writer.generate("Remote Work", None, 5, 15).unwrap();
        assert_eq!(out, ReportOutcome::NoSession);
        assert_eq!(out.message(), "No session found for this topic.");

        stores
            .episodes
            .insert(NewEpisode::new("Remote Work", "no url").in_session(SessionId::new("S1")))
            .unwrap();
        let out = writer.generate("Remote Work", None, 5, 15).unwrap();
        assert_eq!(out, ReportOutcome::NoSources);
        assert_eq!(completion.call_count(Purpose::Report), 0);
    }

    #[test]
    fn generation_failure_is_an_outcome() {
        let stores = Stores::in_memory();
        stores
            .episodes
            .insert(NewEpisode::new("T", "n").with_url("http://a.com").in_session(SessionId::new("S1")))
            .unwrap();
        let index = LexicalIndex::new();
        let completion = ScriptedCompletion::new().fail(Purpose::Report);
        let out = ReportWriter::new(&stores, &index, &completion)
            .generate("T", Some(SessionId::new("S1")), 5, 15)
            .unwrap();
        assert!(matches!(out, ReportOutcome::GenerationFailed { .. }));
        assert!(out.message().starts_with("Error generating report:"));
    }

    #[test]
    fn empty_topic_is_rejected() {
        let stores = Stores::in_memory();
        let index = LexicalIndex::new();
        let completion = ScriptedCompletion::new();
        let err = ReportWriter::new(&stores, &index, &completion)
            .generate("  ", None, 5, 15)
            .unwrap_err();
        assert!(err.is_validation());
    }
}
