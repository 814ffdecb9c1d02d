//! Ground-truth store interfaces and the in-memory reference backend.

mod memory;
mod traits;

use std::sync::Arc;

pub use memory::{InMemoryCoverageStore, InMemoryEpisodeStore, InMemoryFactStore};
pub(crate) use memory::topic_key;
pub use traits::{CoverageStore, EpisodeStore, FactStore, StorageError};

/// Handles to the three ground-truth collaborators a run needs.
#[derive(Clone)]
pub struct Stores {
    pub episodes: Arc<dyn EpisodeStore>,
    pub facts: Arc<dyn FactStore>,
    pub coverage: Arc<dyn CoverageStore>,
}

impl Stores {
    #[must_use]
    pub fn new(
        episodes: Arc<dyn EpisodeStore>,
        facts: Arc<dyn FactStore>,
        coverage: Arc<dyn CoverageStore>,
    ) -> Self {
        Self {
            episodes,
            facts,
            coverage,
        }
    }

    /// Fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryEpisodeStore::new()),
            Arc::new(InMemoryFactStore::new()),
            Arc::new(InMemoryCoverageStore::new()),
        )
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
