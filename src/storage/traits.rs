//! Abstract storage traits for the ground-truth store.
//!
//! Episodes and facts are owned by the ground-truth store; this layer only
//! inserts them through ingestion and reads them back. Coverage records are
//! exposed by the same store but their read/append contract is governed here:
//! records are never updated or deleted.

use thiserror::Error;

use crate::ids::{EpisodeId, FactId, SessionId};
use crate::model::{CoverageRecord, Episode, Fact, NewCoverage, NewEpisode, NewFact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Episode not found.
    #[error("Episode not found: {0}")]
    EpisodeNotFound(EpisodeId),

    /// Fact not found.
    #[error("Fact not found: {0}")]
    FactNotFound(FactId),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Storage trait for episode operations.
///
/// Topics compare case-insensitively. Listing operations return rows most
/// recent first (descending id).
pub trait EpisodeStore: Send + Sync {
    /// Insert a new episode and return it with its assigned id.
    fn insert(&self, episode: NewEpisode) -> Result<Episode, StorageError>;

    /// Get an episode by id.
    fn get(&self, id: EpisodeId) -> Result<Option<Episode>, StorageError>;

    /// Get several episodes, in the order requested. Unknown ids are skipped.
    fn get_many(&self, ids: &[EpisodeId]) -> Result<Vec<Episode>, StorageError>;

    /// Most recent episodes for a topic, any session.
    fn find_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<Episode>, StorageError>;

    /// Most recent episodes for exactly this (topic, session) pair.
    fn find_by_topic_and_session(
        &self,
        topic: &str,
        session: &SessionId,
        limit: usize,
    ) -> Result<Vec<Episode>, StorageError>;

    /// Session of the most recently inserted episode for a topic that has one.
    fn latest_session(&self, topic: &str) -> Result<Option<SessionId>, StorageError>;
}

/// Storage trait for fact operations.
pub trait FactStore: Send + Sync {
    /// Insert a new fact and return it with its assigned id.
    fn insert(&self, fact: NewFact) -> Result<Fact, StorageError>;

    /// Get a fact by id.
    fn get(&self, id: FactId) -> Result<Option<Fact>, StorageError>;

    /// Get several facts, in the order requested. Unknown ids are skipped.
    fn get_many(&self, ids: &[FactId]) -> Result<Vec<Fact>, StorageError>;

    /// Most recent facts for exactly this (topic, session) pair.
    fn find_by_topic_and_session(
        &self,
        topic: &str,
        session: &SessionId,
        limit: usize,
    ) -> Result<Vec<Fact>, StorageError>;
}

/// Append-only coverage log.
pub trait CoverageStore: Send + Sync {
    /// Most recently appended record whose raw question equals `question`
    /// exactly, for the topic.
    fn find_exact(&self, topic: &str, question: &str) -> Result<Option<CoverageRecord>, StorageError>;

    /// Every record for the topic, in append order.
    fn list_by_topic(&self, topic: &str) -> Result<Vec<CoverageRecord>, StorageError>;

    /// Append a record.
    fn append(&self, record: NewCoverage) -> Result<CoverageRecord, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_episode_store_object_safe(_: &dyn EpisodeStore) {}
    fn _assert_fact_store_object_safe(_: &dyn FactStore) {}
    fn _assert_coverage_store_object_safe(_: &dyn CoverageStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::EpisodeNotFound(EpisodeId(7));
        assert!(err.to_string().contains("Episode not found: 7"));

        let err = StorageError::BackendError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
