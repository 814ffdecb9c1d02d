//! Decision gate.
//!
//! Classifies each sub-question of a run as answered from memory or needing
//! external research, and owns the coverage log's write contract.
//!
//! Classification order per question:
//!
//! 1. `reuse_memory = false` sends every question to the evaluator batch
//!    without touching the coverage log.
//! 2. Exact coverage lookup on (topic, raw question).
//! 3. Fuzzy lookup over the topic's normalized keys.
//! 4. A hit older than the policy's freshness window is discarded (not
//!    deleted); a fresh hit is satisfied from cache.
//! 5. Everything left goes to the evaluator in one call. If that call fails
//!    or its reply is malformed, every batched question becomes missing.
//!
//! `needs_web` is recomputed from the statuses; the evaluator's own verdict
//! is never read.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::completion::{parse_evaluation, CompletionRequest, CompletionService, EvaluatedStatus, Purpose};
use crate::error::{GateError, GateResult, ServiceError, ValidationError};
use crate::ids::{EpisodeId, FactId};
use crate::model::{CoverageRecord, NewCoverage, Status, StatusOrigin, SubquestionStatus};
use crate::normalize::{best_match, normalize};
use crate::policy::Policy;
use crate::selector::{EvidenceBundle, EvidenceIds};
use crate::similarity::RetrievalContext;
use crate::storage::{topic_key, CoverageStore, StorageError, Stores};

/// Inputs for one gate evaluation.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub topic: &'a str,
    pub subquestions: &'a [String],
    pub policy: &'a Policy,
    pub retrieval: &'a RetrievalContext,
    /// Reference time for freshness checks.
    pub now: DateTime<Utc>,
}

/// Outcome of the gate for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// One status per sub-question, in sub-question order.
    pub statuses: Vec<SubquestionStatus>,
    pub needs_web: bool,
    /// Questions whose status is not satisfied. Left populated even when the
    /// policy forbids web research; check `needs_web` first.
    pub web_needed_for: Vec<String>,
    /// Capped retrieval ids shown to the evaluator.
    pub evidence: EvidenceIds,
}

impl Decision {
    /// Number of questions that were not satisfied.
    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.web_needed_for.len()
    }

    fn status_mut(&mut self, question: &str) -> Option<&mut SubquestionStatus> {
        self.statuses.iter_mut().find(|s| s.question == question)
    }
}

/// Finds the coverage record for a question: exact match first, then the
/// best fuzzy match over the topic's records.
///
/// `topic_records` caches the topic listing across calls; it is only loaded
/// on the first exact miss.
pub fn lookup_coverage(
    coverage: &dyn CoverageStore,
    topic: &str,
    question: &str,
    topic_records: &mut Option<Vec<CoverageRecord>>,
) -> Result<Option<CoverageRecord>, StorageError> {
    if let Some(record) = coverage.find_exact(topic, question)? {
        tracing::debug!(question = %question, "exact coverage hit");
        return Ok(Some(record));
    }

    if topic_records.is_none() {
        *topic_records = Some(coverage.list_by_topic(topic)?);
    }
    let records = topic_records.as_deref().unwrap_or_default();

    let key = normalize(question);
    Ok(best_match(&key, records.iter(), |r| r.match_key()).map(|m| {
        tracing::debug!(
            question = %question,
            matched = %m.candidate.subquestion,
            score = m.score,
            "fuzzy coverage hit"
        );
        m.candidate.clone()
    }))
}

/// The decision gate over a set of stores and an evaluator.
pub struct DecisionGate<'a> {
    stores: &'a Stores,
    evaluator: &'a dyn CompletionService,
}

impl<'a> DecisionGate<'a> {
    #[must_use]
    pub fn new(stores: &'a Stores, evaluator: &'a dyn CompletionService) -> Self {
        Self { stores, evaluator }
    }

    /// Classifies every sub-question and computes the research signal.
    ///
    /// Storage failures propagate. Evaluator failures do not: they degrade to
    /// marking the whole batch missing.
    pub fn decide(&self, input: &GateInput<'_>) -> GateResult<Decision> {
        if input.topic.trim().is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        let policy = input.policy;

        let mut slots: Vec<Option<SubquestionStatus>> = vec![None; input.subquestions.len()];
        let mut uncovered: Vec<usize> = Vec::new();

        if policy.reuse_memory() {
            let mut topic_records = None;
            for (i, q) in input.subquestions.iter().enumerate() {
                match self.fresh_coverage(input.topic, q, policy, input.now, &mut topic_records)? {
                    Some(record) => slots[i] = Some(SubquestionStatus::previously_covered(q, &record)),
                    None => uncovered.push(i),
                }
            }
        } else {
            tracing::debug!("reuse_memory disabled, skipping coverage checks");
            uncovered.extend(0..input.subquestions.len());
        }

        let evidence = EvidenceIds::from_context(input.retrieval);
        if !uncovered.is_empty() {
            let batch: Vec<&str> = uncovered.iter().map(|&i| input.subquestions[i].as_str()).collect();
            let evaluated = self.evaluate(input.topic, &batch, &evidence, policy, input.now)?;
            for (&i, status) in uncovered.iter().zip(evaluated) {
                slots[i] = Some(status);
            }
        }

        let statuses: Vec<SubquestionStatus> = slots.into_iter().flatten().collect();
        let web_needed_for: Vec<String> = statuses
            .iter()
            .filter(|s| !s.status.is_satisfied())
            .map(|s| s.question.clone())
            .collect();
        let mut needs_web = !web_needed_for.is_empty();
        if needs_web && !policy.allow_web() {
            tracing::info!("allow_web disabled, forcing needs_web=false");
            needs_web = false;
        }

        tracing::info!(
            topic = %input.topic,
            needs_web,
            missing = web_needed_for.len(),
            "decision gate complete"
        );
        Ok(Decision {
            statuses,
            needs_web,
            web_needed_for,
            evidence,
        })
    }

    fn fresh_coverage(
        &self,
        topic: &str,
        question: &str,
        policy: &Policy,
        now: DateTime<Utc>,
        topic_records: &mut Option<Vec<CoverageRecord>>,
    ) -> Result<Option<CoverageRecord>, StorageError> {
        let Some(record) = lookup_coverage(self.stores.coverage.as_ref(), topic, question, topic_records)? else {
            return Ok(None);
        };
        if record.is_stale(now, policy.freshness_days()) {
            tracing::debug!(
                question = %question,
                age_days = record.age_days(now),
                freshness_days = policy.freshness_days(),
                "discarding stale coverage"
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// One status per batched question, in batch order.
    fn evaluate(
        &self,
        topic: &str,
        batch: &[&str],
        evidence: &EvidenceIds,
        policy: &Policy,
        now: DateTime<Utc>,
    ) -> GateResult<Vec<SubquestionStatus>> {
        let bundle = EvidenceBundle::load(
            evidence,
            self.stores.episodes.as_ref(),
            self.stores.facts.as_ref(),
            now,
            policy.freshness_days(),
        )?;
        let request = CompletionRequest::user(Purpose::Evaluation, evaluation_prompt(topic, batch, &bundle)).json();

        let reply = self
            .evaluator
            .complete(&request)
            .and_then(|text| parse_evaluation(&text));
        match reply {
            Ok(evaluated) => Ok(align_statuses(batch, evaluated)),
            Err(err) => {
                tracing::warn!(error = %err, batch = batch.len(), "evaluation failed, marking batch missing");
                Ok(fallback_statuses(batch, &err))
            }
        }
    }
}

/// Maps evaluator entries onto the batch. Entries for questions outside the
/// batch are ignored, the first entry per question wins, and questions the
/// evaluator skipped are missing.
fn align_statuses(batch: &[&str], evaluated: Vec<EvaluatedStatus>) -> Vec<SubquestionStatus> {
    let mut by_question: HashMap<String, EvaluatedStatus> = HashMap::new();
    for entry in evaluated {
        by_question.entry(entry.question.clone()).or_insert(entry);
    }
    batch
        .iter()
        .map(|q| match by_question.get(*q) {
            Some(entry) => SubquestionStatus::new(*q, entry.status, entry.rationale.clone(), StatusOrigin::Evaluator),
            None => SubquestionStatus::new(
                *q,
                Status::Missing,
                "Not evaluated against memory",
                StatusOrigin::EvaluatorFallback,
            ),
        })
        .collect()
}

fn fallback_statuses(batch: &[&str], err: &ServiceError) -> Vec<SubquestionStatus> {
    batch
        .iter()
        .map(|q| {
            SubquestionStatus::new(
                *q,
                Status::Missing,
                format!("Memory evaluation unavailable: {err}"),
                StatusOrigin::EvaluatorFallback,
            )
        })
        .collect()
}

fn evaluation_prompt(topic: &str, batch: &[&str], bundle: &EvidenceBundle) -> String {
    let mut evidence = String::from("--- EVIDENCE FROM MEMORY ---\n");
    if !bundle.episodes.is_empty() {
        evidence.push_str("\n[EPISODES]\n");
        for e in &bundle.episodes {
            evidence.push_str(&format!(
                "- ID: {} | Date: {} | Stale: {} | URL: {}\n  Title: {}\n  Notes: {}...\n",
                e.id,
                e.created_at.format("%Y-%m-%d %H:%M:%S"),
                e.stale,
                e.url.as_deref().unwrap_or("none"),
                e.title.as_deref().unwrap_or("untitled"),
                e.notes,
            ));
        }
    }
    if !bundle.facts.is_empty() {
        evidence.push_str("\n[FACTS]\n");
        for f in &bundle.facts {
            evidence.push_str(&format!(
                "- Fact: {} {} {} (Conf: {})\n",
                f.subject, f.predicate, f.object, f.confidence
            ));
        }
    }
    if bundle.episodes.is_empty() && bundle.facts.is_empty() {
        evidence.push_str("(No relevant memory found)\n");
    }

    let questions = serde_json::to_string(batch).unwrap_or_default();
    format!(
        "Topic: {topic}\nSub-questions: {questions}\n\n{evidence}\n\
         Decide for each sub-question whether the evidence above answers it.\n\
         - \"satisfied\": the evidence contains specific facts that answer it.\n\
         - \"missing\": the evidence is irrelevant or empty.\n\
         - \"stale\": the evidence is relevant but marked Stale: true. Trust the flag, do not guess dates.\n\
         - \"contradictory\": the evidence contains conflicting facts.\n\n\
         Reply with a JSON object only:\n\
         {{\"subquestion_statuses\": [{{\"question\": \"...\", \"status\": \"satisfied|missing|stale|contradictory\", \"rationale\": \"...\"}}]}}"
    )
}

/// Appends coverage for every question the evaluator satisfied from memory.
///
/// Cache hits are skipped; they already have a record. The record carries
/// the capped retrieval ids the evaluator was shown.
pub fn persist_memory_coverage(
    coverage: &dyn CoverageStore,
    topic: &str,
    decision: &Decision,
    now: DateTime<Utc>,
) -> Result<usize, StorageError> {
    let mut written = 0;
    for status in decision
        .statuses
        .iter()
        .filter(|s| s.status.is_satisfied() && s.origin == StatusOrigin::Evaluator)
    {
        tracing::debug!(question = %status.question, "recording memory coverage");
        coverage.append(NewCoverage::new(
            topic,
            &status.question,
            decision.evidence.episodes.clone(),
            decision.evidence.facts.clone(),
            now,
        ))?;
        written += 1;
    }
    Ok(written)
}

/// Records web research results against every question in `web_needed_for`.
///
/// Does nothing when no episode was created. Otherwise appends one record
/// per question and marks its status satisfied, inserting a status if the
/// question had none.
pub fn persist_web_coverage(
    coverage: &dyn CoverageStore,
    topic: &str,
    decision: &mut Decision,
    new_episodes: &[EpisodeId],
    new_facts: &[FactId],
    now: DateTime<Utc>,
) -> Result<usize, StorageError> {
    if new_episodes.is_empty() {
        return Ok(0);
    }
    let ids = new_episodes.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    let rationale = format!("Answered via web in this session (episodes: [{ids}])");

    let questions = decision.web_needed_for.clone();
    for q in &questions {
        coverage.append(NewCoverage::new(topic, q, new_episodes.to_vec(), new_facts.to_vec(), now))?;
        match decision.status_mut(q) {
            Some(status) => {
                status.status = Status::Satisfied;
                status.rationale.clone_from(&rationale);
                status.origin = StatusOrigin::WebResearch;
            }
            None => decision.statuses.push(SubquestionStatus::new(
                q.as_str(),
                Status::Satisfied,
                rationale.clone(),
                StatusOrigin::WebResearch,
            )),
        }
    }
    Ok(questions.len())
}

type LockKey = (String, String);

/// Per-(topic, normalized question) mutual exclusion across concurrent runs.
///
/// A run takes all of its keys at once or waits, so two runs can never hold
/// overlapping subsets and deadlock.
#[derive(Debug, Default)]
pub struct CoverageLocks {
    held: Mutex<HashSet<LockKey>>,
    released: Condvar,
}

impl CoverageLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(topic: &str, questions: &[String]) -> Vec<LockKey> {
        let topic = topic_key(topic);
        let mut keys: Vec<LockKey> = questions.iter().map(|q| (topic.clone(), normalize(q))).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn guard(&self) -> MutexGuard<'_, HashSet<LockKey>> {
        match self.held.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Blocks until none of the keys is held, then takes them all.
    pub fn acquire(&self, topic: &str, questions: &[String]) -> GateResult<CoverageLease<'_>> {
        let keys = Self::keys(topic, questions);
        let mut held = self.held.lock().map_err(|_| GateError::internal("coverage lock poisoned"))?;
        while keys.iter().any(|k| held.contains(k)) {
            tracing::debug!(topic = %topic, "waiting for concurrent run on the same questions");
            held = self
                .released
                .wait(held)
                .map_err(|_| GateError::internal("coverage lock poisoned"))?;
        }
        held.extend(keys.iter().cloned());
        Ok(CoverageLease { locks: self, keys })
    }

    /// Returns true if the question is currently held by some run.
    #[must_use]
    pub fn is_held(&self, topic: &str, question: &str) -> bool {
        self.guard().contains(&(topic_key(topic), normalize(question)))
    }
}

/// Keys held by one run. Released on drop.
#[derive(Debug)]
pub struct CoverageLease<'a> {
    locks: &'a CoverageLocks,
    keys: Vec<LockKey>,
}

impl Drop for CoverageLease<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.guard();
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}
