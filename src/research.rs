//! Research pipeline.
//!
//! One [`ResearchAgent::run`] mints a session, consults memory through the
//! decision gate and only goes to the web for the questions memory could not
//! answer. Every run returns a [`ResearchTrace`] describing what happened.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::completion::{
    non_empty_text, parse_facts, parse_questions, CompletionRequest, CompletionService, ExtractedFact, Purpose,
};
use crate::config::GovernanceConfig;
use crate::error::{GateResult, ValidationError};
use crate::gate::{
    lookup_coverage, persist_memory_coverage, persist_web_coverage, CoverageLocks, Decision, DecisionGate,
    GateInput,
};
use crate::ids::{EpisodeId, FactId, SessionId};
use crate::ingest::Ingestor;
use crate::model::{NewEpisode, NewFact, SubquestionStatus};
use crate::policy::{resolve_for_skill, Policy, SkillCatalog};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::similarity::{retrieve, RetrievalLimits, SimilarityIndex};
use crate::storage::{StorageError, Stores};
use crate::web::{PageFetcher, SearchService};

/// Fallback summary stored when summarization fails.
pub const SUMMARY_FALLBACK: &str = "Summary generation failed.";

const SUMMARY_INPUT_CHARS: usize = 8000;
const COMPRESSION_NOTES_CHARS: usize = 500;
const COMPRESSION_MAX_TOKENS: u32 = 200;

/// Run settings that do not change between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchSettings {
    /// Base policy. Its `max_sources` applies to
    /// [`ResearchAgent::run_with_defaults`]; [`ResearchAgent::run`] takes the
    /// cap as an argument.
    pub base_policy: Policy,
    pub limits: RetrievalLimits,
    pub results_per_question: usize,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            base_policy: Policy::defaults(5),
            limits: RetrievalLimits::default(),
            results_per_question: 3,
        }
    }
}

impl ResearchSettings {
    #[must_use]
    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self {
            base_policy: config.base_policy(),
            limits: config.retrieval.limits(),
            results_per_question: config.web.results_per_question,
        }
    }
}

/// Memory-only answer to a satisfied question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedSummary {
    pub summary: String,
    pub episode_ids: Vec<EpisodeId>,
    pub fact_ids: Vec<FactId>,
}

/// What a run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchTrace {
    pub topic: String,
    pub session_id: SessionId,
    pub selected_skill: Option<String>,
    pub execution_policy: Policy,
    pub subquestions: Vec<String>,
    pub statuses: Vec<SubquestionStatus>,
    pub needs_web: bool,
    pub web_needed_for: Vec<String>,
    /// Urls chosen for fetching, in discovery order.
    pub sources_used: Vec<String>,
    /// Episodes created by this run.
    pub episode_ids: Vec<EpisodeId>,
    /// Facts created by this run.
    pub fact_ids: Vec<FactId>,
    pub decision_gate_used: bool,
    pub reused_memory: bool,
    pub web_calls_skipped: bool,
    pub compressed_summaries: BTreeMap<String, CompressedSummary>,
}

/// Output of the web research step.
#[derive(Debug, Default)]
struct WebHarvest {
    sources: Vec<String>,
    episodes: Vec<EpisodeId>,
    facts: Vec<FactId>,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Sub-questions used when generation fails or comes back empty.
#[must_use]
pub fn fallback_subquestions(topic: &str) -> Vec<String> {
    vec![format!("key facts about {topic}"), format!("recent developments in {topic}")]
}

/// Orchestrates research runs over a fixed set of collaborators.
pub struct ResearchAgent {
    ingestor: Ingestor,
    completion: Arc<dyn CompletionService>,
    search: Arc<dyn SearchService>,
    fetcher: Arc<dyn PageFetcher>,
    catalog: SkillCatalog,
    locks: Arc<CoverageLocks>,
    settings: ResearchSettings,
    progress: Option<ProgressReporter>,
}

impl ResearchAgent {
    #[must_use]
    pub fn new(
        stores: Stores,
        index: Arc<dyn SimilarityIndex>,
        completion: Arc<dyn CompletionService>,
        search: Arc<dyn SearchService>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            ingestor: Ingestor::new(stores, index),
            completion,
            search,
            fetcher,
            catalog: SkillCatalog::default(),
            locks: Arc::new(CoverageLocks::new()),
            settings: ResearchSettings::default(),
            progress: None,
        }
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: SkillCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ResearchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shares coverage locks with other agents over the same stores.
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<CoverageLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Applies a configuration: run settings, plus the skill catalog at
    /// `skills_path`, indexed for selection.
    pub fn with_config(self, config: &GovernanceConfig) -> GateResult<Self> {
        let catalog = config.load_skills()?;
        let indexed = self.ingestor.index_skills(&catalog);
        tracing::info!(skills = indexed, "skill catalog indexed");
        Ok(self.with_settings(ResearchSettings::from_config(config)).with_catalog(catalog))
    }

    #[must_use]
    pub fn with_progress(mut self, reporter: ProgressReporter) -> Self {
        self.progress = Some(reporter);
        self
    }

    #[must_use]
    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    fn stores(&self) -> &Stores {
        self.ingestor.stores()
    }

    fn report(&self, event: ProgressEvent) {
        if let Some(reporter) = &self.progress {
            reporter.report(event);
        }
    }

    /// Runs one research session for `topic`.
    ///
    /// Fails on an empty topic, on a storage failure, or when web research is
    /// needed and the search credential is missing. Every other failure
    /// degrades inside the run.
    pub fn run(&self, topic: &str, max_sources: usize) -> GateResult<ResearchTrace> {
        if topic.trim().is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        let session = SessionId::mint();
        let now = Utc::now();
        tracing::info!(topic = %topic, session = %session, "research run started");
        self.report(ProgressEvent::RunStarted {
            topic: topic.to_string(),
            session_id: session.clone(),
        });

        let retrieval = retrieve(self.ingestor.index().as_ref(), topic, self.settings.limits);
        let selected_skill = retrieval.selected_skill();
        let base = Policy::new(
            self.settings.base_policy.freshness_days(),
            self.settings.base_policy.allow_web(),
            max_sources,
            self.settings.base_policy.reuse_memory(),
        );
        let policy = resolve_for_skill(base, &self.catalog, selected_skill.as_deref());
        tracing::info!(skill = ?selected_skill, policy = ?policy, "execution policy resolved");
        self.report(ProgressEvent::SkillSelected {
            skill: selected_skill.clone(),
        });

        let subquestions = self.generate_subquestions(topic);
        self.report(ProgressEvent::SubquestionsReady {
            questions: subquestions.clone(),
        });

        let _lease = self.locks.acquire(topic, &subquestions)?;

        let gate = DecisionGate::new(self.stores(), self.completion.as_ref());
        let mut decision = gate.decide(&GateInput {
            topic,
            subquestions: &subquestions,
            policy: &policy,
            retrieval: &retrieval,
            now,
        })?;
        persist_memory_coverage(self.stores().coverage.as_ref(), topic, &decision, now)?;
        self.report(ProgressEvent::DecisionMade {
            needs_web: decision.needs_web,
            missing: decision.missing_count(),
        });

        let harvest = if decision.needs_web {
            let harvest = self.research_web(topic, &session, &decision.web_needed_for, policy.max_sources())?;
            persist_web_coverage(
                self.stores().coverage.as_ref(),
                topic,
                &mut decision,
                &harvest.episodes,
                &harvest.facts,
                now,
            )?;
            harvest
        } else {
            tracing::info!(topic = %topic, "memory is sufficient, skipping web research");
            WebHarvest::default()
        };

        let compressed_summaries = self.compress_summaries(topic, &decision.statuses)?;
        let reused = !decision.needs_web;
        let Decision {
            statuses,
            needs_web,
            web_needed_for,
            ..
        } = decision;

        tracing::info!(
            topic = %topic,
            session = %session,
            sources = harvest.sources.len(),
            episodes = harvest.episodes.len(),
            "research run finished"
        );
        self.report(ProgressEvent::RunFinished {
            session_id: session.clone(),
            sources_used: harvest.sources.len(),
        });

        Ok(ResearchTrace {
            topic: topic.to_string(),
            session_id: session,
            selected_skill,
            execution_policy: policy,
            subquestions,
            statuses,
            needs_web,
            web_needed_for,
            sources_used: harvest.sources,
            episode_ids: harvest.episodes,
            fact_ids: harvest.facts,
            decision_gate_used: true,
            reused_memory: reused,
            web_calls_skipped: reused,
            compressed_summaries,
        })
    }

    /// Runs with the base policy's `max_sources`.
    pub fn run_with_defaults(&self, topic: &str) -> GateResult<ResearchTrace> {
        self.run(topic, self.settings.base_policy.max_sources())
    }

    fn generate_subquestions(&self, topic: &str) -> Vec<String> {
        let prompt = format!(
            "Topic: {topic}\n\nBased on this topic, generate 3-6 specific sub-questions to guide web research. \
             Return ONLY a JSON object with a single key 'questions' containing a list of strings."
        );
        let request = CompletionRequest::user(Purpose::Subquestions, prompt).json();
        match self.completion.complete(&request).and_then(|text| parse_questions(&text)) {
            Ok(questions) if !questions.is_empty() => questions,
            Ok(_) => {
                tracing::warn!(topic = %topic, "no sub-questions generated, using fallback pair");
                fallback_subquestions(topic)
            }
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "sub-question generation failed, using fallback pair");
                fallback_subquestions(topic)
            }
        }
    }

    /// Distinct result links for `questions`, in discovery order, capped at
    /// `max_sources`.
    fn discover_sources(&self, questions: &[String], max_sources: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for q in questions {
            if urls.len() >= max_sources {
                break;
            }
            self.report(ProgressEvent::Searching { question: q.clone() });
            let results = match self.search.search(q, self.settings.results_per_question) {
                Ok(results) => results,
                Err(err) => {
                    tracing::warn!(question = %q, error = %err, "search failed");
                    continue;
                }
            };
            for link in results.into_iter().filter_map(|r| r.link).filter(|l| !l.is_empty()) {
                if seen.insert(link.clone()) {
                    urls.push(link);
                }
            }
        }
        urls.truncate(max_sources);
        urls
    }

    fn research_web(
        &self,
        topic: &str,
        session: &SessionId,
        questions: &[String],
        max_sources: usize,
    ) -> GateResult<WebHarvest> {
        if let Err(err) = self.search.check_credentials() {
            if err.is_fatal() {
                return Err(err.into());
            }
            tracing::warn!(error = %err, "search credential check failed");
        }

        let sources = self.discover_sources(questions, max_sources);
        tracing::info!(topic = %topic, sources = sources.len(), "web sources selected");

        let mut harvest = WebHarvest {
            sources: sources.clone(),
            ..WebHarvest::default()
        };
        for url in &sources {
            let page = match self.fetcher.fetch(url) {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "fetch failed");
                    self.report(ProgressEvent::SourceSkipped {
                        url: url.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            let Some(text) = page.usable_text() else {
                tracing::debug!(url = %url, "skipping page without text");
                self.report(ProgressEvent::SourceSkipped {
                    url: url.clone(),
                    reason: "no text content".to_string(),
                });
                continue;
            };

            let summary = self.summarize(topic, url, text);
            let title = page.title.as_deref().filter(|t| !t.is_empty()).unwrap_or("Web Source");
            let episode = self.ingestor.ingest_episode(
                NewEpisode::new(topic, summary.as_str())
                    .with_title(title)
                    .with_url(url.as_str())
                    .with_outcome("processed")
                    .with_tags("research, web_source")
                    .in_session(session.clone()),
            )?;
            harvest.episodes.push(episode.id);

            let facts = self.extract_facts(&summary, episode.id);
            let mut ingested = 0;
            for f in facts {
                let fact = self.ingestor.ingest_fact(
                    NewFact::new(topic, f.subject, f.predicate, f.object)
                        .with_confidence(f.confidence)
                        .from_episode(episode.id, Some(url.clone()))
                        .in_session(session.clone()),
                )?;
                harvest.facts.push(fact.id);
                ingested += 1;
            }
            tracing::debug!(url = %url, episode = %episode.id, facts = ingested, "source ingested");
            self.report(ProgressEvent::SourceIngested {
                url: url.clone(),
                episode_id: episode.id,
                facts: ingested,
            });
        }
        Ok(harvest)
    }

    fn summarize(&self, topic: &str, url: &str, text: &str) -> String {
        let prompt = format!(
            "Summarize the following text related to '{topic}'. Focus on key facts. Keep it under 200 words.\n\nText:\n{}",
            truncate_chars(text, SUMMARY_INPUT_CHARS)
        );
        let request = CompletionRequest::user(Purpose::Summary, prompt);
        match self.completion.complete(&request).and_then(non_empty_text) {
            Ok(summary) => summary,
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "summarization failed");
                SUMMARY_FALLBACK.to_string()
            }
        }
    }

    fn extract_facts(&self, summary: &str, episode: EpisodeId) -> Vec<ExtractedFact> {
        let prompt = format!(
            "Extract 5-12 key semantic facts from the text below as JSON triples.\n\
             Return ONLY a JSON object with a single key 'facts' containing a list of objects.\n\
             Format: {{\"facts\": [{{\"subject\": \"...\", \"predicate\": \"...\", \"object\": \"...\", \"confidence\": 0.0-1.0}}]}}\n\
             Text:\n{summary}"
        );
        let request = CompletionRequest::user(Purpose::FactExtraction, prompt).json();
        match self.completion.complete(&request).and_then(|text| parse_facts(&text)) {
            Ok(facts) => facts,
            Err(err) => {
                tracing::warn!(episode = %episode, error = %err, "fact extraction failed");
                Vec::new()
            }
        }
    }

    /// Summarizes each satisfied question from the evidence its coverage
    /// record points at. Questions without a record or whose summary fails
    /// are left out.
    fn compress_summaries(
        &self,
        topic: &str,
        statuses: &[SubquestionStatus],
    ) -> Result<BTreeMap<String, CompressedSummary>, StorageError> {
        let stores = self.stores();
        let mut topic_records = None;
        let mut out = BTreeMap::new();

        for status in statuses.iter().filter(|s| s.status.is_satisfied()) {
            let q = &status.question;
            let Some(record) = lookup_coverage(stores.coverage.as_ref(), topic, q, &mut topic_records)? else {
                tracing::debug!(question = %q, "no coverage record, skipping summary");
                continue;
            };

            let episodes = stores.episodes.get_many(&record.episode_ids)?;
            let facts = stores.facts.get_many(&record.fact_ids)?;
            let mut context = format!("Topic: {topic}\nQuestion: {q}\n\n[EVIDENCE]\n");
            for e in &episodes {
                context.push_str(&format!(
                    "Source ({}): {}\n",
                    format_time(e.created_at),
                    truncate_chars(&e.notes, COMPRESSION_NOTES_CHARS)
                ));
            }
            for f in &facts {
                context.push_str(&format!(
                    "Fact: {} {} {} (Conf: {})\n",
                    f.subject, f.predicate, f.object, f.confidence
                ));
            }
            let prompt = format!(
                "Summarize the answer to the Question using ONLY the provided memory evidence. \
                 If information is missing, state that explicitly.\n\
                 Keep it factual and under 5 sentences.\n\n{context}"
            );
            let request = CompletionRequest::user(Purpose::Compression, prompt).with_max_tokens(COMPRESSION_MAX_TOKENS);

            match self.completion.complete(&request).and_then(non_empty_text) {
                Ok(summary) => {
                    out.insert(
                        q.clone(),
                        CompressedSummary {
                            summary,
                            episode_ids: record.episode_ids,
                            fact_ids: record.fact_ids,
                        },
                    );
                }
                Err(err) => tracing::warn!(question = %q, error = %err, "summary compression failed"),
            }
        }
        Ok(out)
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl std::fmt::Debug for ResearchAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchAgent")
            .field("catalog", &self.catalog.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::completion::ScriptedCompletion;
    use crate::model::Status;
    use crate::similarity::LexicalIndex;
    use crate::web::{StaticFetcher, StaticSearch};

    fn agent(completion: ScriptedCompletion, search: StaticSearch, fetcher: StaticFetcher) -> (ResearchAgent, Stores) {
        let stores = Stores::in_memory();
        let agent = ResearchAgent::new(
            stores.clone(),
            Arc::new(LexicalIndex::new()),
            Arc::new(completion),
            Arc::new(search),
            Arc::new(fetcher),
        );
        (agent, stores)
    }

    #[test]
    fn subquestion_fallback_pair() {
        let (agent, _) = agent(
            ScriptedCompletion::new().ok(Purpose::Subquestions, r#"{"questions": []}"#),
            StaticSearch::new(),
            StaticFetcher::new(),
        );
        assert_eq!(
            agent.generate_subquestions("AI"),
            vec!["key facts about AI", "recent developments in AI"]
        );
    }

    #[test]
    fn discovery_dedups_in_order_and_caps() {
        let search = StaticSearch::new()
            .with_links("q1", ["http://a.com", "http://b.com", "http://a.com"])
            .with_links("q2", ["http://b.com", "http://c.com", "http://d.com"])
            .with_links("q3", ["http://e.com"]);
        let (agent, _) = agent(ScriptedCompletion::new(), search, StaticFetcher::new());
        let questions = vec!["q1".to_string(), "q2".to_string(), "q3".to_string()];
        assert_eq!(
            agent.discover_sources(&questions, 3),
            vec!["http://a.com", "http://b.com", "http://c.com"]
        );
    }

    #[test]
    fn web_path_ingests_and_marks_questions_answered() {
        let completion = ScriptedCompletion::new()
            .ok(Purpose::Subquestions, r#"{"questions": ["What is X?"]}"#)
            .fail(Purpose::Evaluation)
            .ok(Purpose::Summary, "X is a thing. It matters.")
            .ok(
                Purpose::FactExtraction,
                r#"{"facts": [{"subject": "X", "predicate": "is", "object": "a thing", "confidence": 0.9}, {"subject": null}]}"#,
            )
            .ok(Purpose::Compression, "X is a thing.");
        let search = StaticSearch::new().with_links("What is X?", ["http://a.com", "http://empty.com"]);
        let fetcher = StaticFetcher::new()
            .with_html("http://a.com", "<title>About X</title><p>X is a thing.</p>")
            .with_html("http://empty.com", "<script>only()</script>");
        let (agent, stores) = agent(completion, search, fetcher);

        let trace = agent.run("X", 5).unwrap();
        assert!(trace.needs_web);
        assert!(!trace.reused_memory);
        assert_eq!(trace.sources_used, vec!["http://a.com", "http://empty.com"]);
        assert_eq!(trace.episode_ids.len(), 1);
        assert_eq!(trace.fact_ids.len(), 2);
        assert_eq!(trace.statuses.len(), 1);
        assert_eq!(trace.statuses[0].status, Status::Satisfied);
        assert!(trace.statuses[0].rationale.starts_with("Answered via web in this session"));
        assert!(trace.compressed_summaries.contains_key("What is X?"));

        let ep = stores.episodes.get(trace.episode_ids[0]).unwrap().unwrap();
        assert_eq!(ep.title.as_deref(), Some("About X"));
        assert_eq!(ep.session_id.as_ref(), Some(&trace.session_id));
        assert_eq!(ep.tags, "research, web_source");
        let defaulted = stores.facts.get(trace.fact_ids[1]).unwrap().unwrap();
        assert_eq!(defaulted.subject, "unknown");
        assert_eq!(defaulted.predicate, "related to");
    }

    #[test]
    fn summary_failure_stores_fallback_note() {
        let completion = ScriptedCompletion::new()
            .ok(Purpose::Subquestions, r#"{"questions": ["q"]}"#)
            .fail(Purpose::Evaluation)
            .fail(Purpose::Summary)
            .fail(Purpose::FactExtraction)
            .fail(Purpose::Compression);
        let search = StaticSearch::new().with_links("q", ["http://a.com"]);
        let fetcher = StaticFetcher::new().with_html("http://a.com", "<p>text</p>");
        let (agent, stores) = agent(completion, search, fetcher);

        let trace = agent.run("T", 5).unwrap();
        let ep = stores.episodes.get(trace.episode_ids[0]).unwrap().unwrap();
        assert_eq!(ep.notes, SUMMARY_FALLBACK);
        assert_eq!(ep.title.as_deref(), Some("Web Source"));
        assert!(trace.fact_ids.is_empty());
        assert!(trace.compressed_summaries.is_empty());
    }
}
