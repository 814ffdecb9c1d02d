//! Ingestion into the ground-truth store and the similarity index.
//!
//! The ground-truth write happens first and is authoritative. Indexing is
//! best effort: a failed upsert is logged and the stored row stands.

use std::sync::Arc;

use crate::ids::{EvidenceRef, SessionId};
use crate::model::{Episode, Fact, NewEpisode, NewFact};
use crate::policy::{skill_canonical, SkillCatalog};
use crate::similarity::{Category, IndexMetadata, SimilarityIndex};
use crate::storage::{StorageError, Stores};

/// Canonical text an episode is indexed under. Empty fields are omitted.
#[must_use]
pub fn episode_canonical(e: &Episode) -> String {
    let fields = [
        ("Topic", Some(e.topic.as_str())),
        ("Title", e.title.as_deref()),
        ("URL", e.url.as_deref()),
        ("Notes", Some(e.notes.as_str())),
        ("Tags", Some(e.tags.as_str())),
        ("Outcome", Some(e.outcome.as_str())),
    ];
    fields
        .iter()
        .filter_map(|(label, value)| match value {
            Some(v) if !v.is_empty() => Some(format!("{label}: {v}")),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Canonical text a fact is indexed under.
#[must_use]
pub fn fact_canonical(f: &Fact) -> String {
    format!("{} Fact: {} {} {}", f.topic, f.subject, f.predicate, f.object)
}

/// Writes episodes and facts, then indexes them.
#[derive(Clone)]
pub struct Ingestor {
    stores: Stores,
    index: Arc<dyn SimilarityIndex>,
}

impl Ingestor {
    #[must_use]
    pub fn new(stores: Stores, index: Arc<dyn SimilarityIndex>) -> Self {
        Self { stores, index }
    }

    fn metadata(topic: &str, session: Option<&SessionId>) -> IndexMetadata {
        IndexMetadata {
            topic: Some(topic.to_string()),
            session_id: session.cloned(),
        }
    }

    /// Stores an episode and indexes it as `episode:<n>`.
    pub fn ingest_episode(&self, episode: NewEpisode) -> Result<Episode, StorageError> {
        let stored = self.stores.episodes.insert(episode)?;
        let id = EvidenceRef::from(stored.id).to_string();
        let meta = Self::metadata(&stored.topic, stored.session_id.as_ref());
        if let Err(err) = self
            .index
            .upsert(Category::Episodic, &id, &episode_canonical(&stored), meta)
        {
            tracing::warn!(id = %id, error = %err, "failed to index episode");
        }
        Ok(stored)
    }

    /// Stores a fact and indexes it as `fact:<n>`.
    pub fn ingest_fact(&self, fact: NewFact) -> Result<Fact, StorageError> {
        let stored = self.stores.facts.insert(fact)?;
        let id = EvidenceRef::from(stored.id).to_string();
        let meta = Self::metadata(&stored.topic, stored.session_id.as_ref());
        if let Err(err) = self
            .index
            .upsert(Category::Semantic, &id, &fact_canonical(&stored), meta)
        {
            tracing::warn!(id = %id, error = %err, "failed to index fact");
        }
        Ok(stored)
    }

    /// Indexes every skill of a catalog as `skill:<id>`. Returns how many
    /// were indexed.
    pub fn index_skills(&self, catalog: &SkillCatalog) -> usize {
        let mut indexed = 0;
        for skill in catalog.skills() {
            let id = format!("skill:{}", skill.id);
            match self
                .index
                .upsert(Category::Procedural, &id, &skill_canonical(skill), IndexMetadata::default())
            {
                Ok(()) => indexed += 1,
                Err(err) => tracing::warn!(id = %id, error = %err, "failed to index skill"),
            }
        }
        indexed
    }

    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub fn index(&self) -> &Arc<dyn SimilarityIndex> {
        &self.index
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::error::ServiceError;
    use crate::ids::EpisodeId;
    use crate::similarity::{LexicalIndex, RankedHits};

    #[test]
    fn episode_canonical_omits_empty_fields() {
        let e = Episode {
            id: EpisodeId(1),
            topic: "Remote Work".to_string(),
            title: None,
            url: Some("http://a.com".to_string()),
            notes: "Summary.".to_string(),
            outcome: "processed".to_string(),
            tags: String::new(),
            created_at: Utc::now(),
            session_id: None,
        };
        assert_eq!(
            episode_canonical(&e),
            "Topic: Remote Work\nURL: http://a.com\nNotes: Summary.\nOutcome: processed"
        );
    }

    #[test]
    fn ingest_indexes_with_typed_ids_and_session_metadata() {
        let index = Arc::new(LexicalIndex::new());
        let ingestor = Ingestor::new(Stores::in_memory(), index.clone());
        let session = SessionId::new("S1");

        let ep = ingestor
            .ingest_episode(
                NewEpisode::new("Remote Work", "Hybrid schedules are common")
                    .with_url("http://a.com")
                    .in_session(session.clone()),
            )
            .unwrap();
        let fact = ingestor
            .ingest_fact(
                NewFact::new("Remote Work", "hybrid", "is", "common")
                    .from_episode(ep.id, ep.url.clone())
                    .in_session(session.clone()),
            )
            .unwrap();

        assert_eq!(fact_canonical(&fact), "Remote Work Fact: hybrid is common");
        let meta = index.metadata(Category::Episodic, "episode:1").unwrap();
        assert_eq!(meta.session_id, Some(session));
        assert!(index.metadata(Category::Semantic, "fact:1").is_some());
    }

    struct BrokenIndex;

    impl SimilarityIndex for BrokenIndex {
        fn query(&self, _: Category, _: &str, _: usize) -> Result<RankedHits, ServiceError> {
            Ok(RankedHits::default())
        }

        fn upsert(&self, _: Category, _: &str, _: &str, _: IndexMetadata) -> Result<(), ServiceError> {
            Err(ServiceError::failed("similarity", "offline"))
        }
    }

    #[test]
    fn index_failure_keeps_ground_truth_row() {
        let stores = Stores::in_memory();
        let ingestor = Ingestor::new(stores.clone(), Arc::new(BrokenIndex));
        let ep = ingestor.ingest_episode(NewEpisode::new("T", "n")).unwrap();
        assert!(stores.episodes.get(ep.id).unwrap().is_some());

        let catalog = SkillCatalog::from_yaml_str("- id: a\n- id: b\n").unwrap();
        assert_eq!(ingestor.index_skills(&catalog), 0);
    }
}
