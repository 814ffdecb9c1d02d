//! Evidence selection.
//!
//! Similarity results are ranking hints; the ground-truth store decides what
//! is in scope. Two entry points share that rule:
//!
//! - [`EvidenceIds::from_context`] flattens ranked hits into capped, typed id
//!   lists for the decision gate's evaluator context.
//! - [`select_for_report`] intersects ranked hits with a (topic, session)
//!   candidate set, so a report can never draw on foreign-session evidence.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EpisodeId, EvidenceRef, FactId};
use crate::model::{CoverageRecord, Episode, Fact};
use crate::similarity::{RankedHits, RetrievalContext};
use crate::storage::{EpisodeStore, FactStore, StorageError};

/// Maximum characters of episode notes shown to the evaluator.
pub const EVIDENCE_NOTES_CHARS: usize = 300;

/// Parses typed ids in rank order. Malformed ids are dropped.
#[must_use]
pub fn parse_typed_ids<'a, I>(raw: I) -> Vec<EvidenceRef>
where
    I: IntoIterator<Item = &'a String>,
{
    raw.into_iter()
        .filter_map(|id| match id.parse::<EvidenceRef>() {
            Ok(r) => Some(r),
            Err(err) => {
                tracing::debug!(error = %err, "dropping unparseable evidence id");
                None
            }
        })
        .collect()
}

/// Rank-ordered, capped evidence ids taken from a retrieval context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceIds {
    pub episodes: Vec<EpisodeId>,
    pub facts: Vec<FactId>,
}

impl EvidenceIds {
    /// Flattens episodic then semantic hits and splits them by kind.
    ///
    /// Duplicates are kept; the lists are capped at
    /// [`CoverageRecord::MAX_EPISODE_IDS`] and [`CoverageRecord::MAX_FACT_IDS`].
    #[must_use]
    pub fn from_context(ctx: &RetrievalContext) -> Self {
        let refs = parse_typed_ids(ctx.episodic.ids.iter().chain(ctx.semantic.ids.iter()));
        let mut episodes: Vec<EpisodeId> = refs.iter().filter_map(EvidenceRef::as_episode).collect();
        let mut facts: Vec<FactId> = refs.iter().filter_map(EvidenceRef::as_fact).collect();
        episodes.truncate(CoverageRecord::MAX_EPISODE_IDS);
        facts.truncate(CoverageRecord::MAX_FACT_IDS);
        Self { episodes, facts }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty() && self.facts.is_empty()
    }
}

/// Episode evidence as presented to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeEvidence {
    pub id: EpisodeId,
    pub title: Option<String>,
    pub url: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub stale: bool,
}

/// Fact evidence as presented to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactEvidence {
    pub id: FactId,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub source_url: Option<String>,
}

/// Resolved evidence for the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub episodes: Vec<EpisodeEvidence>,
    pub facts: Vec<FactEvidence>,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

impl EvidenceBundle {
    /// Fetches the referenced rows in id order, truncating notes and flagging
    /// episodes older than `freshness_days`.
    pub fn load(
        ids: &EvidenceIds,
        episodes: &dyn EpisodeStore,
        facts: &dyn FactStore,
        now: DateTime<Utc>,
        freshness_days: i64,
    ) -> Result<Self, StorageError> {
        let episodes = episodes
            .get_many(&ids.episodes)?
            .into_iter()
            .map(|e| EpisodeEvidence {
                id: e.id,
                stale: (now - e.created_at).num_days() > freshness_days,
                title: e.title,
                url: e.url,
                notes: truncate_chars(&e.notes, EVIDENCE_NOTES_CHARS),
                created_at: e.created_at,
            })
            .collect();
        let facts = facts
            .get_many(&ids.facts)?
            .into_iter()
            .map(|f| FactEvidence {
                id: f.id,
                subject: f.subject,
                predicate: f.predicate,
                object: f.object,
                confidence: f.confidence,
                source_url: f.source_url,
            })
            .collect();
        Ok(Self { episodes, facts })
    }
}

/// Ordered intersection of `ranked` with `candidates`, topped up from
/// `candidates` in their own order.
///
/// Every returned item comes from `candidates`, whatever `ranked` contains.
pub fn select_for_report<T, K, F>(ranked: &[K], candidates: Vec<T>, quota: usize, key_of: F) -> Vec<T>
where
    K: Eq + Hash + Copy,
    F: Fn(&T) -> K,
{
    let order: Vec<K> = candidates.iter().map(&key_of).collect();
    let mut pool: HashMap<K, T> = candidates.into_iter().map(|c| (key_of(&c), c)).collect();
    let mut seen: HashSet<K> = HashSet::new();
    let mut out = Vec::with_capacity(quota.min(order.len()));

    for key in ranked.iter().chain(order.iter()) {
        if out.len() >= quota {
            break;
        }
        if !seen.insert(*key) {
            continue;
        }
        if let Some(item) = pool.remove(key) {
            out.push(item);
        }
    }
    out
}

/// Report selection for episodes.
#[must_use]
pub fn select_episodes(hits: &RankedHits, candidates: Vec<Episode>, quota: usize) -> Vec<Episode> {
    let ranked: Vec<EpisodeId> = parse_typed_ids(&hits.ids)
        .iter()
        .filter_map(EvidenceRef::as_episode)
        .collect();
    select_for_report(&ranked, candidates, quota, |e| e.id)
}

/// Report selection for facts.
#[must_use]
pub fn select_facts(hits: &RankedHits, candidates: Vec<Fact>, quota: usize) -> Vec<Fact> {
    let ranked: Vec<FactId> = parse_typed_ids(&hits.ids)
        .iter()
        .filter_map(EvidenceRef::as_fact)
        .collect();
    select_for_report(&ranked, candidates, quota, |f| f.id)
}

/// The exact set of urls a report may cite. Sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedUrlSet(BTreeSet<String>);

impl AllowedUrlSet {
    /// Distinct, non-empty urls of the selected episodes.
    #[must_use]
    pub fn from_episodes(episodes: &[Episode]) -> Self {
        Self(
            episodes
                .iter()
                .filter_map(|e| e.url.as_deref())
                .filter(|u| !u.trim().is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Exact string membership.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.0.contains(url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for AllowedUrlSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(Into::into)
                .filter(|u: &String| !u.trim().is_empty())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    use crate::ids::SessionId;
    use crate::model::{NewEpisode, NewFact};
    use crate::storage::{InMemoryEpisodeStore, InMemoryFactStore};

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    fn episode(id: i64, session: &str, url: Option<&str>) -> Episode {
        Episode {
            id: EpisodeId(id),
            topic: "T".to_string(),
            title: None,
            url: url.map(str::to_string),
            notes: String::new(),
            outcome: "processed".to_string(),
            tags: String::new(),
            created_at: Utc::now(),
            session_id: Some(SessionId::new(session)),
        }
    }

    #[test]
    fn from_context_splits_caps_and_drops_malformed() {
        let mut episodic: Vec<String> = (1..=12).map(|n| format!("episode:{n}")).collect();
        episodic.push("episode:abc".to_string());
        episodic.push("episode:1".to_string());
        let ctx = RetrievalContext {
            episodic: RankedHits::new(episodic),
            semantic: RankedHits::new(ids(&["fact:4", "garbage", "fact:4"])),
            ..RetrievalContext::default()
        };
        let ev = EvidenceIds::from_context(&ctx);
        assert_eq!(ev.episodes.len(), 10);
        assert_eq!(ev.episodes[0], EpisodeId(1));
        assert_eq!(ev.facts, vec![FactId(4), FactId(4)]);
    }

    #[test]
    fn report_selection_prefers_rank_then_recency() {
        // Candidates arrive most recent first.
        let candidates = vec![episode(5, "S1", None), episode(4, "S1", None), episode(2, "S1", None)];
        let hits = RankedHits::new(ids(&["episode:2", "episode:9", "episode:2"]));
        let selected = select_episodes(&hits, candidates, 2);
        assert_eq!(selected.iter().map(|e| e.id.0).collect::<Vec<_>>(), vec![2, 5]);
    }

    #[test]
    fn report_selection_never_leaks_foreign_ids() {
        let candidates = vec![episode(3, "S1", None), episode(1, "S1", None)];
        // 7 and 8 belong to another session; the index is not trusted.
        let hits = RankedHits::new(ids(&["episode:7", "episode:8", "fact:1", "skill:x"]));
        let selected = select_episodes(&hits, candidates, 10);
        assert_eq!(selected.iter().map(|e| e.id.0).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn report_selection_respects_zero_quota() {
        let candidates = vec![episode(1, "S1", None)];
        let hits = RankedHits::new(ids(&["episode:1"]));
        assert!(select_episodes(&hits, candidates, 0).is_empty());
    }

    #[test]
    fn allowed_urls_are_distinct_sorted_non_empty() {
        let eps = vec![
            episode(1, "S1", Some("http://b.com")),
            episode(2, "S1", Some("http://a.com")),
            episode(3, "S1", Some("http://b.com")),
            episode(4, "S1", Some("")),
            episode(5, "S1", None),
        ];
        let allowed = AllowedUrlSet::from_episodes(&eps);
        assert_eq!(allowed.to_vec(), vec!["http://a.com", "http://b.com"]);
        assert!(allowed.contains("http://a.com"));
        assert!(!allowed.contains("http://a.com/"));
    }

    #[test]
    fn evidence_bundle_truncates_notes_and_flags_staleness() {
        let episodes = InMemoryEpisodeStore::new();
        let facts = InMemoryFactStore::new();
        let long = "x".repeat(400);
        let e = episodes.insert(NewEpisode::new("T", long)).unwrap();
        let f = facts.insert(NewFact::new("T", "a", "b", "c")).unwrap();

        let ids = EvidenceIds {
            episodes: vec![e.id, EpisodeId(99)],
            facts: vec![f.id],
        };
        let fresh = EvidenceBundle::load(&ids, &episodes, &facts, Utc::now(), 180).unwrap();
        assert_eq!(fresh.episodes.len(), 1);
        assert_eq!(fresh.episodes[0].notes.chars().count(), EVIDENCE_NOTES_CHARS);
        assert!(!fresh.episodes[0].stale);
        assert_eq!(fresh.facts.len(), 1);

        let later = Utc::now() + Duration::days(3);
        let strict = EvidenceBundle::load(&ids, &episodes, &facts, later, 1).unwrap();
        assert!(strict.episodes[0].stale);
    }
}
