//! TOML configuration.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Credentials never live here: the file only names the
//! environment variables they are read from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, GateResult, ValidationError};
use crate::policy::{Policy, SkillCatalog, DEFAULT_FRESHNESS_DAYS};
use crate::report::{DEFAULT_MAX_EPISODES, DEFAULT_MAX_FACTS};
use crate::similarity::RetrievalLimits;

/// `[policy]`: the base policy a skill override is merged into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub freshness_days: i64,
    pub allow_web: bool,
    pub reuse_memory: bool,
    pub max_sources: usize,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            freshness_days: DEFAULT_FRESHNESS_DAYS,
            allow_web: true,
            reuse_memory: true,
            max_sources: 5,
        }
    }
}

/// `[retrieval]`: result counts per similarity category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub k_episodic: usize,
    pub k_semantic: usize,
    pub k_skill: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        let limits = RetrievalLimits::default();
        Self {
            k_episodic: limits.k_episodic,
            k_semantic: limits.k_semantic,
            k_skill: limits.k_skill,
        }
    }
}

impl RetrievalSection {
    #[must_use]
    pub const fn limits(&self) -> RetrievalLimits {
        RetrievalLimits {
            k_episodic: self.k_episodic,
            k_semantic: self.k_semantic,
            k_skill: self.k_skill,
        }
    }
}

/// `[report]`: selection quotas for report generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub max_episodes: usize,
    pub max_facts: usize,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            max_episodes: DEFAULT_MAX_EPISODES,
            max_facts: DEFAULT_MAX_FACTS,
        }
    }
}

/// `[web]`: search and page fetch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub results_per_question: usize,
    /// Timeout for page fetches and search calls.
    pub fetch_timeout_secs: u64,
    /// Name of the environment variable holding the search API key.
    pub search_api_key_env: String,
    pub user_agent: String,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            results_per_question: 3,
            fetch_timeout_secs: 15,
            search_api_key_env: "SERPAPI_API_KEY".to_string(),
            user_agent: concat!("research-gate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// `[completion]`: chat-completion endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSection {
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for CompletionSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub policy: PolicySection,
    pub retrieval: RetrievalSection,
    pub report: ReportSection,
    pub web: WebSection,
    pub completion: CompletionSection,
    /// Optional YAML skill catalog. A relative path read by
    /// [`GovernanceConfig::load`] is resolved against the config file's
    /// directory.
    pub skills_path: Option<PathBuf>,
}

impl GovernanceConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let (Some(skills), Some(dir)) = (config.skills_path.as_mut(), path.parent()) {
            if skills.is_relative() {
                *skills = dir.join(&*skills);
            }
        }
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> GateResult<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::from)?;
        Ok(config.validate()?)
    }

    /// Rejects values no run could work with.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.policy.freshness_days < 0 {
            return Err(invalid(
                "policy.freshness_days",
                format!("must be non-negative (got {})", self.policy.freshness_days),
            ));
        }
        if self.policy.max_sources == 0 {
            return Err(invalid("policy.max_sources", "must be at least 1"));
        }
        if self.web.results_per_question == 0 {
            return Err(invalid("web.results_per_question", "must be at least 1"));
        }
        if self.web.fetch_timeout_secs == 0 {
            return Err(invalid("web.fetch_timeout_secs", "must be at least 1"));
        }
        if self.completion.timeout_secs == 0 {
            return Err(invalid("completion.timeout_secs", "must be at least 1"));
        }
        let k = [
            ("retrieval.k_episodic", self.retrieval.k_episodic),
            ("retrieval.k_semantic", self.retrieval.k_semantic),
            ("retrieval.k_skill", self.retrieval.k_skill),
        ];
        if let Some((field, _)) = k.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(field, "must be at least 1"));
        }
        Ok(self)
    }

    /// Loads the skill catalog at `skills_path`. Without a path the catalog
    /// is empty.
    pub fn load_skills(&self) -> Result<SkillCatalog, ConfigError> {
        match &self.skills_path {
            Some(path) => SkillCatalog::load(path),
            None => Ok(SkillCatalog::default()),
        }
    }

    /// The base policy before any skill override.
    #[must_use]
    pub const fn base_policy(&self) -> Policy {
        Policy::new(
            self.policy.freshness_days,
            self.policy.allow_web,
            self.policy.max_sources,
            self.policy.reuse_memory,
        )
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}
