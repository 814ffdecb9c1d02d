//! # research-gate - Evidence governance for a memory-first research assistant
//!
//! research-gate decides, per research sub-question, whether stored memory
//! already answers it or whether external research is needed. It reuses
//! cached coverage, keeps reports scoped to one (topic, session), and makes
//! sure a generated report only cites sources that were actually ingested.
//!
//! ## Core Concepts
//!
//! - **Episode / Fact**: ground-truth records of ingested sources and the claims extracted from them
//! - **Coverage record**: an append-only note that a topic + sub-question was answered by specific evidence
//! - **Decision gate**: classifies sub-questions as satisfied, missing, stale or contradictory
//! - **Allowed URL set**: the only urls a report may cite, derived from its selected evidence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use research_gate::{LexicalIndex, ReportWriter, ResearchAgent, Stores};
//!
//! let stores = Stores::in_memory();
//! let index = Arc::new(LexicalIndex::new());
//! let agent = ResearchAgent::new(stores.clone(), index.clone(), completion, search, fetcher);
//!
//! let trace = agent.run("Remote Work", 5)?;
//! let report = ReportWriter::new(&stores, index.as_ref(), completion.as_ref())
//!     .generate("Remote Work", Some(trace.session_id), 5, 15)?;
//! println!("{}", report.message());
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod ids;
pub mod model;
pub mod normalize;
pub mod policy;

// Collaborators
pub mod completion;
pub mod similarity;
pub mod storage;
pub mod web;

// Governance
pub mod citation;
pub mod gate;
pub mod selector;

// Pipelines
pub mod config;
pub mod ingest;
pub mod progress;
pub mod report;
pub mod research;

// Re-export primary types at crate root for convenience
pub use citation::{validate, ValidatedReport};
pub use completion::{CompletionRequest, CompletionService, Purpose, ScriptedCompletion};
pub use config::GovernanceConfig;
pub use error::{ConfigError, GateError, GateResult, ServiceError, ValidationError};
pub use gate::{CoverageLocks, Decision, DecisionGate, GateInput};
pub use ids::{EpisodeId, EvidenceRef, FactId, SessionId};
pub use model::{CoverageRecord, Episode, Fact, NewCoverage, NewEpisode, NewFact, Status, StatusOrigin, SubquestionStatus};
pub use normalize::{normalize, similarity, FUZZY_MATCH_THRESHOLD};
pub use policy::{Policy, PolicyOverride, Skill, SkillCatalog};
pub use progress::{ProgressEvent, ProgressReporter, ProgressStream};
pub use report::{ReportOutcome, ReportWriter};
pub use research::{ResearchAgent, ResearchSettings, ResearchTrace};
pub use selector::AllowedUrlSet;
pub use similarity::{LexicalIndex, RankedHits, RetrievalContext, SimilarityIndex};
pub use storage::{CoverageStore, EpisodeStore, FactStore, StorageError, Stores};
pub use web::{FetchedPage, PageFetcher, SearchResult, SearchService, StaticFetcher, StaticSearch};
