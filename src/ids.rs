//! Identifier types.
//!
//! Episodes and facts are keyed by the ground-truth store's auto-increment
//! integers. The similarity index refers to them through typed string ids
//! (`episode:<n>`, `fact:<n>`), which are parsed at the boundary and dropped
//! when malformed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Ground-truth id of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub i64);

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ground-truth id of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(pub i64);

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque research-run identifier.
///
/// Minted once per research run; never inferred from content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mints a fresh random session id.
    #[must_use]
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps an existing identifier (e.g. one supplied by a report caller).
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A typed reference into the ground-truth store, as used by the similarity index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EvidenceRef {
    Episode(EpisodeId),
    Fact(FactId),
}

impl EvidenceRef {
    pub const EPISODE_PREFIX: &'static str = "episode";
    pub const FACT_PREFIX: &'static str = "fact";

    /// Returns the episode id, if this is an episode reference.
    #[must_use]
    pub const fn as_episode(&self) -> Option<EpisodeId> {
        match self {
            Self::Episode(id) => Some(*id),
            Self::Fact(_) => None,
        }
    }

    /// Returns the fact id, if this is a fact reference.
    #[must_use]
    pub const fn as_fact(&self) -> Option<FactId> {
        match self {
            Self::Fact(id) => Some(*id),
            Self::Episode(_) => None,
        }
    }
}

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Episode(id) => write!(f, "{}:{id}", Self::EPISODE_PREFIX),
            Self::Fact(id) => write!(f, "{}:{id}", Self::FACT_PREFIX),
        }
    }
}

impl FromStr for EvidenceRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidTypedId { raw: s.to_string() };
        let (prefix, num) = s.split_once(':').ok_or_else(invalid)?;
        let n: i64 = num.trim().parse().map_err(|_| invalid())?;
        match prefix.trim() {
            Self::EPISODE_PREFIX => Ok(Self::Episode(EpisodeId(n))),
            Self::FACT_PREFIX => Ok(Self::Fact(FactId(n))),
            _ => Err(invalid()),
        }
    }
}

impl From<EpisodeId> for EvidenceRef {
    fn from(id: EpisodeId) -> Self {
        Self::Episode(id)
    }
}

impl From<FactId> for EvidenceRef {
    fn from(id: FactId) -> Self {
        Self::Fact(id)
    }
}
