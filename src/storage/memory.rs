//! In-memory storage backend.
//!
//! Thread-safe implementations of the storage traits, intended for embedded
//! usage, tests, and as a reference implementation.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::ids::{EpisodeId, FactId, SessionId};
use crate::model::{CoverageRecord, Episode, Fact, NewCoverage, NewEpisode, NewFact};
use crate::storage::traits::{CoverageStore, EpisodeStore, FactStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

pub(crate) fn topic_key(s: &str) -> String {
    s.trim().to_lowercase()
}

#[derive(Debug, Default)]
struct EpisodeState {
    rows: BTreeMap<EpisodeId, Episode>,
    last_id: i64,
}

/// Thread-safe in-memory episode store.
#[derive(Debug, Default)]
pub struct InMemoryEpisodeStore {
    state: RwLock<EpisodeState>,
}

impl InMemoryEpisodeStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EpisodeStore for InMemoryEpisodeStore {
    fn insert(&self, episode: NewEpisode) -> Result<Episode, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("episode.insert"))?;
        state.last_id += 1;
        let row = Episode {
            id: EpisodeId(state.last_id),
            topic: episode.topic,
            title: episode.title,
            url: episode.url,
            notes: episode.notes,
            outcome: episode.outcome,
            tags: episode.tags,
            created_at: Utc::now(),
            session_id: episode.session_id,
        };
        state.rows.insert(row.id, row.clone());
        Ok(row)
    }

    fn get(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("episode.get"))?;
        Ok(state.rows.get(&id).cloned())
    }

    fn get_many(&self, ids: &[EpisodeId]) -> Result<Vec<Episode>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("episode.get_many"))?;
        Ok(ids.iter().filter_map(|id| state.rows.get(id).cloned()).collect())
    }

    fn find_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<Episode>, StorageError> {
        let key = topic_key(topic);
        let state = self.state.read().map_err(|_| lock_err("episode.find_by_topic"))?;
        Ok(state
            .rows
            .values()
            .rev()
            .filter(|e| topic_key(&e.topic) == key)
            .take(limit)
            .cloned()
            .collect())
    }

    fn find_by_topic_and_session(
        &self,
        topic: &str,
        session: &SessionId,
        limit: usize,
    ) -> Result<Vec<Episode>, StorageError> {
        let key = topic_key(topic);
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("episode.find_by_topic_and_session"))?;
        Ok(state
            .rows
            .values()
            .rev()
            .filter(|e| topic_key(&e.topic) == key && e.session_id.as_ref() == Some(session))
            .take(limit)
            .cloned()
            .collect())
    }

    fn latest_session(&self, topic: &str) -> Result<Option<SessionId>, StorageError> {
        let key = topic_key(topic);
        let state = self.state.read().map_err(|_| lock_err("episode.latest_session"))?;
        Ok(state
            .rows
            .values()
            .rev()
            .filter(|e| topic_key(&e.topic) == key)
            .find_map(|e| e.session_id.clone()))
    }
}

#[derive(Debug, Default)]
struct FactState {
    rows: BTreeMap<FactId, Fact>,
    last_id: i64,
}

/// Thread-safe in-memory fact store.
#[derive(Debug, Default)]
pub struct InMemoryFactStore {
    state: RwLock<FactState>,
}

impl InMemoryFactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FactStore for InMemoryFactStore {
    fn insert(&self, fact: NewFact) -> Result<Fact, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("fact.insert"))?;
        state.last_id += 1;
        let row = Fact {
            id: FactId(state.last_id),
            topic: fact.topic,
            subject: fact.subject,
            predicate: fact.predicate,
            object: fact.object,
            confidence: fact.confidence.clamp(0.0, 1.0),
            source_episode_id: fact.source_episode_id,
            source_url: fact.source_url,
            created_at: Utc::now(),
            session_id: fact.session_id,
        };
        state.rows.insert(row.id, row.clone());
        Ok(row)
    }

    fn get(&self, id: FactId) -> Result<Option<Fact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("fact.get"))?;
        Ok(state.rows.get(&id).cloned())
    }

    fn get_many(&self, ids: &[FactId]) -> Result<Vec<Fact>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("fact.get_many"))?;
        Ok(ids.iter().filter_map(|id| state.rows.get(id).cloned()).collect())
    }

    fn find_by_topic_and_session(
        &self,
        topic: &str,
        session: &SessionId,
        limit: usize,
    ) -> Result<Vec<Fact>, StorageError> {
        let key = topic_key(topic);
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("fact.find_by_topic_and_session"))?;
        Ok(state
            .rows
            .values()
            .rev()
            .filter(|f| topic_key(&f.topic) == key && f.session_id.as_ref() == Some(session))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Thread-safe in-memory coverage log.
#[derive(Debug, Default)]
pub struct InMemoryCoverageStore {
    records: RwLock<Vec<CoverageRecord>>,
}

impl InMemoryCoverageStore {
    /// Create a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> Result<usize, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("coverage.len"))?;
        Ok(records.len())
    }

    /// Returns true if nothing has been appended.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl CoverageStore for InMemoryCoverageStore {
    fn find_exact(&self, topic: &str, question: &str) -> Result<Option<CoverageRecord>, StorageError> {
        let key = topic_key(topic);
        let records = self.records.read().map_err(|_| lock_err("coverage.find_exact"))?;
        Ok(records
            .iter()
            .rev()
            .find(|r| topic_key(&r.topic) == key && r.subquestion == question)
            .cloned())
    }

    fn list_by_topic(&self, topic: &str) -> Result<Vec<CoverageRecord>, StorageError> {
        let key = topic_key(topic);
        let records = self.records.read().map_err(|_| lock_err("coverage.list_by_topic"))?;
        Ok(records
            .iter()
            .filter(|r| topic_key(&r.topic) == key)
            .cloned()
            .collect())
    }

    fn append(&self, record: NewCoverage) -> Result<CoverageRecord, StorageError> {
        let row = CoverageRecord {
            topic: record.topic,
            subquestion: record.subquestion,
            normalized_subquestion: Some(record.normalized_subquestion),
            episode_ids: record.episode_ids,
            fact_ids: record.fact_ids,
            created_at: record.created_at,
        };
        let mut records = self.records.write().map_err(|_| lock_err("coverage.append"))?;
        records.push(row.clone());
        Ok(row)
    }
}
