//! Execution policy resolution and the skill catalog it draws overrides from.
//!
//! A run starts from a default policy and may pick up a partial override from
//! the selected skill's `execution_policy`. The merge happens once; the
//! resulting [`Policy`] is immutable for the rest of the run.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigError, ValidationError};

/// Default freshness window, in days.
pub const DEFAULT_FRESHNESS_DAYS: i64 = 180;

/// Resolved execution policy for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    freshness_days: i64,
    allow_web: bool,
    max_sources: usize,
    reuse_memory: bool,
}

impl Policy {
    #[must_use]
    pub const fn new(freshness_days: i64, allow_web: bool, max_sources: usize, reuse_memory: bool) -> Self {
        Self {
            freshness_days,
            allow_web,
            max_sources,
            reuse_memory,
        }
    }

    /// The default policy: 180-day freshness, web allowed, memory reused.
    #[must_use]
    pub const fn defaults(max_sources: usize) -> Self {
        Self::new(DEFAULT_FRESHNESS_DAYS, true, max_sources, true)
    }

    /// Merges an optional override into `base`, producing the run's policy.
    #[must_use]
    pub fn resolve(base: Self, overrides: Option<&PolicyOverride>) -> Self {
        let Some(o) = overrides else {
            return base;
        };
        Self {
            freshness_days: o.freshness_days.unwrap_or(base.freshness_days),
            allow_web: o.allow_web.unwrap_or(base.allow_web),
            max_sources: o.max_sources.unwrap_or(base.max_sources),
            reuse_memory: o.reuse_memory.unwrap_or(base.reuse_memory),
        }
    }

    #[must_use]
    pub const fn freshness_days(&self) -> i64 {
        self.freshness_days
    }

    #[must_use]
    pub const fn allow_web(&self) -> bool {
        self.allow_web
    }

    #[must_use]
    pub const fn max_sources(&self) -> usize {
        self.max_sources
    }

    #[must_use]
    pub const fn reuse_memory(&self) -> bool {
        self.reuse_memory
    }
}

/// A validated partial policy. Only the four recognized keys exist here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyOverride {
    pub freshness_days: Option<i64>,
    pub allow_web: Option<bool>,
    pub max_sources: Option<usize>,
    pub reuse_memory: Option<bool>,
}

impl PolicyOverride {
    /// Builds an override from a skill's raw `execution_policy` map.
    ///
    /// Unrecognized keys are ignored. A recognized key with an unusable value
    /// is dropped with a warning; the rest of the override still applies.
    #[must_use]
    pub fn from_map(raw: &Map<String, Value>) -> Self {
        let mut out = Self::default();
        for (key, value) in raw {
            let applied = match key.as_str() {
                "freshness_days" => parse_freshness(value).map(|v| out.freshness_days = Some(v)),
                "allow_web" => parse_bool(key, value).map(|v| out.allow_web = Some(v)),
                "max_sources" => parse_max_sources(value).map(|v| out.max_sources = Some(v)),
                "reuse_memory" => parse_bool(key, value).map(|v| out.reuse_memory = Some(v)),
                _ => {
                    tracing::debug!(key = %key, "ignoring unrecognized execution policy key");
                    Ok(())
                }
            };
            if let Err(err) = applied {
                tracing::warn!(error = %err, "ignoring execution policy field");
            }
        }
        out
    }

    /// Returns true if no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.freshness_days.is_none()
            && self.allow_web.is_none()
            && self.max_sources.is_none()
            && self.reuse_memory.is_none()
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidPolicyField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn parse_freshness(value: &Value) -> Result<i64, ValidationError> {
    match value.as_i64() {
        Some(days) if days >= 0 => Ok(days),
        Some(days) => Err(invalid("freshness_days", format!("must be non-negative, got {days}"))),
        None => Err(invalid("freshness_days", format!("expected an integer, got {value}"))),
    }
}

fn parse_max_sources(value: &Value) -> Result<usize, ValidationError> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| invalid("max_sources", format!("expected a non-negative integer, got {value}")))
}

fn parse_bool(field: &str, value: &Value) -> Result<bool, ValidationError> {
    value
        .as_bool()
        .ok_or_else(|| invalid(field, format!("expected a boolean, got {value}")))
}

/// A procedural-memory skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub guardrails: Vec<String>,
    #[serde(default)]
    pub execution_policy: Option<Map<String, Value>>,
}

impl Skill {
    /// The skill's policy override, if it declares one.
    #[must_use]
    pub fn policy_override(&self) -> Option<PolicyOverride> {
        self.execution_policy.as_ref().map(PolicyOverride::from_map)
    }
}

/// Text used to index a skill in procedural memory.
#[must_use]
pub fn skill_canonical(skill: &Skill) -> String {
    format!(
        "Skill: {}\nDescription: {}\nTriggers: {}\nSteps: {}\nGuardrails: {}",
        skill.name.as_deref().unwrap_or("Unknown Skill"),
        skill.description,
        skill.triggers.join(", "),
        skill.steps.join(" | "),
        skill.guardrails.join(" | "),
    )
}

/// The set of skills available to a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkillCatalog {
    skills: Vec<Skill>,
}

impl SkillCatalog {
    #[must_use]
    pub fn new(skills: Vec<Skill>) -> Self {
        Self { skills }
    }

    /// Loads a YAML catalog. A missing file is an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Parses a YAML document holding a list of skills.
    ///
    /// A document that is not a list yields an empty catalog. Entries without
    /// an `id` are skipped.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
        let serde_yaml::Value::Sequence(entries) = doc else {
            tracing::warn!("skill catalog must contain a list; ignoring it");
            return Ok(Self::default());
        };

        let mut skills = Vec::with_capacity(entries.len());
        for entry in entries {
            let has_id = entry.get("id").is_some_and(|id| !id.is_null());
            if !has_id {
                let name = entry.get("name").and_then(serde_yaml::Value::as_str).unwrap_or("Unknown");
                tracing::warn!(skill = %name, "skill missing 'id', skipping");
                continue;
            }
            match serde_yaml::from_value::<Skill>(entry) {
                Ok(skill) => skills.push(skill),
                Err(err) => tracing::warn!(error = %err, "skipping malformed skill entry"),
            }
        }
        Ok(Self { skills })
    }

    /// Looks up a skill by id. Accepts index-style ids (`skill:<id>`).
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Skill> {
        let bare = id.strip_prefix("skill:").unwrap_or(id);
        self.skills.iter().find(|s| s.id == bare)
    }

    #[must_use]
    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

/// Resolves the run policy from the selected skill, if any.
#[must_use]
pub fn resolve_for_skill(base: Policy, catalog: &SkillCatalog, selected: Option<&str>) -> Policy {
    let overrides = selected
        .and_then(|id| catalog.find(id))
        .and_then(Skill::policy_override);
    Policy::resolve(base, overrides.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn defaults_apply_without_skill() {
        let policy = resolve_for_skill(Policy::defaults(5), &SkillCatalog::default(), None);
        assert_eq!(policy, Policy::new(180, true, 5, true));
    }

    #[test]
    fn override_applies_recognized_keys_only() {
        let o = PolicyOverride::from_map(&map(json!({
            "freshness_days": 1,
            "allow_web": false,
            "temperature": 0.9,
            "max_sources": 2
        })));
        let policy = Policy::resolve(Policy::defaults(5), Some(&o));
        assert_eq!(policy.freshness_days(), 1);
        assert!(!policy.allow_web());
        assert_eq!(policy.max_sources(), 2);
        assert!(policy.reuse_memory());
    }

    #[test]
    fn wrongly_typed_fields_are_ignored() {
        let o = PolicyOverride::from_map(&map(json!({
            "freshness_days": "soon",
            "allow_web": "yes",
            "max_sources": -3,
            "reuse_memory": false
        })));
        assert_eq!(
            o,
            PolicyOverride {
                reuse_memory: Some(false),
                ..PolicyOverride::default()
            }
        );
        assert!(!o.is_empty());
    }

    #[test]
    fn negative_freshness_is_rejected() {
        let err = parse_freshness(&json!(-1)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPolicyField { ref field, .. } if field == "freshness_days"));
    }

    #[test]
    fn catalog_skips_entries_without_id() {
        let catalog = SkillCatalog::from_yaml_str(
            r"
- id: skill_fresh
  name: Fresh
  execution_policy:
    freshness_days: 1
- name: Nameless
  description: no id here
",
        )
        .unwrap();
        assert_eq!(catalog.len(), 1);
        let skill = catalog.find("skill:skill_fresh").unwrap();
        assert_eq!(skill.policy_override().unwrap().freshness_days, Some(1));
    }

    #[test]
    fn non_list_catalog_is_empty() {
        let catalog = SkillCatalog::from_yaml_str("id: lonely\n").unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn missing_catalog_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SkillCatalog::load(dir.path().join("skills.yaml")).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn selected_skill_overrides_policy() {
        let catalog = SkillCatalog::from_yaml_str(
            "- id: offline\n  execution_policy:\n    allow_web: false\n    reuse_memory: false\n",
        )
        .unwrap();
        let policy = resolve_for_skill(Policy::defaults(3), &catalog, Some("offline"));
        assert!(!policy.allow_web());
        assert!(!policy.reuse_memory());
        assert_eq!(policy.freshness_days(), DEFAULT_FRESHNESS_DAYS);

        let unknown = resolve_for_skill(Policy::defaults(3), &catalog, Some("other"));
        assert_eq!(unknown, Policy::defaults(3));
    }

    #[test]
    fn skill_canonical_text() {
        let skill = Skill {
            id: "s".to_string(),
            name: Some("Market Scan".to_string()),
            description: "Scan markets".to_string(),
            triggers: vec!["market".to_string(), "trend".to_string()],
            steps: vec!["search".to_string(), "summarize".to_string()],
            guardrails: vec![],
            execution_policy: None,
        };
        let text = skill_canonical(&skill);
        assert!(text.starts_with("Skill: Market Scan\n"));
        assert!(text.contains("Triggers: market, trend"));
        assert!(text.contains("Steps: search | summarize"));
    }
}
