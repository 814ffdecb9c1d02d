//! Deterministic lexical similarity index.
//!
//! Feature hashing over tokens with `blake3`, compared by cosine similarity.
//! It is *not* a neural embedding model. It gives a stable, offline baseline
//! for embedded use and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use blake3::Hasher;

use super::{Category, IndexMetadata, RankedHits, SimilarityIndex};
use crate::error::ServiceError;

/// Embedding dimensionality for lexical embeddings.
pub const DEFAULT_EMBEDDING_DIM: usize = 64;

fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// Create a deterministic, L2-normalized lexical embedding.
#[must_use]
pub fn lexical_embedding(text: &str) -> Vec<f32> {
    let dim = DEFAULT_EMBEDDING_DIM;
    let mut vec = vec![0.0f32; dim];

    for token in tokenize(&text.to_ascii_lowercase()) {
        let mut h = Hasher::new();
        h.update(token.as_bytes());
        let hash = h.finalize();
        let bytes = hash.as_bytes();

        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&bytes[..8]);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (u64::from_le_bytes(bucket) % dim as u64) as usize;
        let sign = if (bytes[8] & 1) == 0 { 1.0f32 } else { -1.0f32 };
        vec[idx] += sign;
    }

    let norm2: f64 = vec.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    if norm2 > 0.0 {
        #[allow(clippy::cast_possible_truncation)]
        let inv = norm2.sqrt().recip() as f32;
        for x in &mut vec {
            *x *= inv;
        }
    }
    vec
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    embedding: Vec<f32>,
    metadata: IndexMetadata,
}

/// Thread-safe in-memory similarity index.
#[derive(Debug, Default)]
pub struct LexicalIndex {
    entries: RwLock<HashMap<Category, Vec<Entry>>>,
}

impl LexicalIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata stored for an item, if indexed.
    #[must_use]
    pub fn metadata(&self, category: Category, id: &str) -> Option<IndexMetadata> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&category)?
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.metadata.clone())
    }

    fn lock_err() -> ServiceError {
        ServiceError::failed("similarity", "poisoned lock")
    }
}

impl SimilarityIndex for LexicalIndex {
    fn query(&self, category: Category, text: &str, k: usize) -> Result<RankedHits, ServiceError> {
        let q = lexical_embedding(text);
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        let Some(items) = entries.get(&category) else {
            return Ok(RankedHits::default());
        };

        let mut scored: Vec<(&Entry, f32)> = items.iter().map(|e| (e, cosine(&q, &e.embedding))).collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(RankedHits {
            ids: scored.iter().map(|(e, _)| e.id.clone()).collect(),
            distances: scored.iter().map(|(_, s)| 1.0 - s).collect(),
        })
    }

    fn upsert(
        &self,
        category: Category,
        id: &str,
        text: &str,
        metadata: IndexMetadata,
    ) -> Result<(), ServiceError> {
        let entry = Entry {
            id: id.to_string(),
            embedding: lexical_embedding(text),
            metadata,
        };
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        let items = entries.entry(category).or_default();
        match items.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => items.push(entry),
        }
        Ok(())
    }
}
