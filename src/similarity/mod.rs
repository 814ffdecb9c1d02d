//! Similarity index collaborator.
//!
//! The index ranks stored items per category and is only ever a ranking
//! hint: ids it returns are resolved against the ground-truth store before
//! use, and nothing it returns is trusted to be in scope.
//!
//! Index transports disagree on whether results come back as a flat id list
//! or as one list per query. [`RankedHits`] deserializes either shape into a
//! single flat rank order so the rest of the crate never branches on it.

mod lexical;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::ids::SessionId;

pub use lexical::{lexical_embedding, LexicalIndex, DEFAULT_EMBEDDING_DIM};

/// Memory category an item is indexed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Ingested source documents (`episode:<n>`).
    Episodic,
    /// Extracted facts (`fact:<n>`).
    Semantic,
    /// Skills (`skill:<id>`).
    Procedural,
}

impl Category {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }
}

/// Id list as it arrives from an index transport: flat, or one list per query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RankedIds {
    Flat(Vec<String>),
    Nested(Vec<Vec<String>>),
}

impl RankedIds {
    /// Flattens in rank order. Duplicates are kept.
    #[must_use]
    pub fn flatten(self) -> Vec<String> {
        match self {
            Self::Flat(ids) => ids,
            Self::Nested(groups) => groups.into_iter().flatten().collect(),
        }
    }
}

/// Distance list, same shape rules as [`RankedIds`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RankedDistances {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl RankedDistances {
    #[must_use]
    pub fn flatten(self) -> Vec<f32> {
        match self {
            Self::Flat(d) => d,
            Self::Nested(groups) => groups.into_iter().flatten().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireHits {
    #[serde(default)]
    ids: Option<RankedIds>,
    #[serde(default)]
    distances: Option<RankedDistances>,
}

/// Ranked candidates for one category, best first.
///
/// `distances` is either empty or the same length as `ids`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireHits")]
pub struct RankedHits {
    pub ids: Vec<String>,
    pub distances: Vec<f32>,
}

impl From<WireHits> for RankedHits {
    fn from(wire: WireHits) -> Self {
        let ids = wire.ids.map(RankedIds::flatten).unwrap_or_default();
        let mut distances = wire.distances.map(RankedDistances::flatten).unwrap_or_default();
        if distances.len() != ids.len() {
            distances.clear();
        }
        Self { ids, distances }
    }
}

impl RankedHits {
    #[must_use]
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            distances: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// First id, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }
}

/// Metadata stored alongside an indexed item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// A per-category similarity index.
pub trait SimilarityIndex: Send + Sync {
    /// Up to `k` ids ranked by similarity to `text`.
    fn query(&self, category: Category, text: &str, k: usize) -> Result<RankedHits, ServiceError>;

    /// Insert or replace an item.
    fn upsert(
        &self,
        category: Category,
        id: &str,
        text: &str,
        metadata: IndexMetadata,
    ) -> Result<(), ServiceError>;
}

/// Per-category result counts for [`retrieve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalLimits {
    pub k_episodic: usize,
    pub k_semantic: usize,
    pub k_skill: usize,
}

impl Default for RetrievalLimits {
    fn default() -> Self {
        Self {
            k_episodic: 10,
            k_semantic: 10,
            k_skill: 3,
        }
    }
}

/// Ranked hits for all three categories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub episodic: RankedHits,
    pub semantic: RankedHits,
    pub procedural: RankedHits,
}

impl RetrievalContext {
    /// The top procedural id, with any `skill:` prefix removed.
    #[must_use]
    pub fn selected_skill(&self) -> Option<String> {
        self.procedural
            .first()
            .map(|id| id.strip_prefix("skill:").unwrap_or(id).to_string())
    }
}

/// Queries every category. A failing category degrades to no hits.
pub fn retrieve(index: &dyn SimilarityIndex, query: &str, limits: RetrievalLimits) -> RetrievalContext {
    let run = |category: Category, k: usize| match index.query(category, query, k) {
        Ok(hits) => hits,
        Err(err) => {
            tracing::warn!(category = category.as_str(), error = %err, "similarity query failed");
            RankedHits::default()
        }
    };
    RetrievalContext {
        episodic: run(Category::Episodic, limits.k_episodic),
        semantic: run(Category::Semantic, limits.k_semantic),
        procedural: run(Category::Procedural, limits.k_skill),
    }
}
