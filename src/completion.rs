//! Completion service collaborator.
//!
//! The completion service is an untrusted black box. Every structured reply
//! is schema-checked here before any other module sees it; a reply that does
//! not conform becomes [`ServiceError::Malformed`] and the caller applies its
//! deterministic fallback.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServiceError;
use crate::model::Status;

const SERVICE: &str = "completion";

/// Which call site a request comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Subquestions,
    Evaluation,
    Summary,
    FactExtraction,
    Compression,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// One completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub purpose: Purpose,
    pub messages: Vec<Message>,
    /// Ask the service for a JSON object reply.
    pub json_mode: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// A single user-message request.
    #[must_use]
    pub fn user(purpose: Purpose, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            messages: vec![Message {
                role: Role::User,
                content: prompt.into(),
            }],
            json_mode: false,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Prepends a system message.
    #[must_use]
    pub fn with_system(mut self, content: impl Into<String>) -> Self {
        self.messages.insert(
            0,
            Message {
                role: Role::System,
                content: content.into(),
            },
        );
        self
    }

    #[must_use]
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Content of the last user message.
    #[must_use]
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or("", |m| m.content.as_str())
    }
}

/// Blocking completion backend. Implementations do not retry.
pub trait CompletionService: Send + Sync {
    /// Returns the reply text.
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;
}

/// Strips a Markdown code fence around a JSON reply, if present.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parses a reply that must be a JSON object.
pub fn parse_json_object(text: &str) -> Result<serde_json::Map<String, Value>, ServiceError> {
    match serde_json::from_str::<Value>(strip_fence(text)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ServiceError::malformed(
            SERVICE,
            format!("expected a JSON object, got {}", kind_of(&other)),
        )),
        Err(e) => Err(ServiceError::malformed(SERVICE, format!("invalid JSON: {e}"))),
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `{"questions": [string, ...]}`. Blank or non-string entries are skipped.
pub fn parse_questions(text: &str) -> Result<Vec<String>, ServiceError> {
    let map = parse_json_object(text)?;
    let Some(Value::Array(items)) = map.get("questions") else {
        return Err(ServiceError::malformed(SERVICE, "'questions' must be a list"));
    };
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect())
}

/// One entry of an evaluator reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatedStatus {
    pub question: String,
    pub status: Status,
    pub rationale: String,
}

/// `{"subquestion_statuses": [{"question", "status", "rationale"?}, ...]}`.
///
/// The evaluator's own `needs_web` and `web_needed_for` are not read. Any
/// entry without a string question or a recognized status makes the whole
/// reply malformed.
pub fn parse_evaluation(text: &str) -> Result<Vec<EvaluatedStatus>, ServiceError> {
    let map = parse_json_object(text)?;
    let Some(Value::Array(items)) = map.get("subquestion_statuses") else {
        return Err(ServiceError::malformed(SERVICE, "'subquestion_statuses' must be a list"));
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let entry = item
                .as_object()
                .ok_or_else(|| ServiceError::malformed(SERVICE, format!("status #{i} is not an object")))?;
            let question = entry
                .get("question")
                .and_then(Value::as_str)
                .ok_or_else(|| ServiceError::malformed(SERVICE, format!("status #{i} has no question")))?;
            let raw_status = entry.get("status").and_then(Value::as_str).unwrap_or_default();
            let status = Status::parse(raw_status).ok_or_else(|| {
                ServiceError::malformed(SERVICE, format!("status #{i} has unknown status '{raw_status}'"))
            })?;
            let rationale = entry
                .get("rationale")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(EvaluatedStatus {
                question: question.to_string(),
                status,
                rationale: rationale.to_string(),
            })
        })
        .collect()
}

/// A fact triple as extracted, after defaults are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
}

impl ExtractedFact {
    pub const DEFAULT_SUBJECT: &'static str = "unknown";
    pub const DEFAULT_PREDICATE: &'static str = "related to";
    pub const DEFAULT_OBJECT: &'static str = "unknown";
    pub const DEFAULT_CONFIDENCE: f32 = 0.5;
}

fn text_field(entry: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `{"facts": [{"subject", "predicate", "object", "confidence"}, ...]}`.
///
/// A non-list `facts` yields no facts. Non-object entries are skipped and
/// missing fields take their defaults.
pub fn parse_facts(text: &str) -> Result<Vec<ExtractedFact>, ServiceError> {
    let map = parse_json_object(text)?;
    let Some(Value::Array(items)) = map.get("facts") else {
        return Ok(Vec::new());
    };

    Ok(items
        .iter()
        .filter_map(Value::as_object)
        .map(|entry| {
            #[allow(clippy::cast_possible_truncation)]
            let confidence = entry
                .get("confidence")
                .and_then(Value::as_f64)
                .map_or(ExtractedFact::DEFAULT_CONFIDENCE, |c| c.clamp(0.0, 1.0) as f32);
            ExtractedFact {
                subject: text_field(entry, "subject")
                    .unwrap_or_else(|| ExtractedFact::DEFAULT_SUBJECT.to_string()),
                predicate: text_field(entry, "predicate")
                    .unwrap_or_else(|| ExtractedFact::DEFAULT_PREDICATE.to_string()),
                object: text_field(entry, "object")
                    .unwrap_or_else(|| ExtractedFact::DEFAULT_OBJECT.to_string()),
                confidence,
            }
        })
        .collect())
}

/// A plain-text reply, rejected when blank.
pub fn non_empty_text(text: String) -> Result<String, ServiceError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::malformed(SERVICE, "empty reply"));
    }
    Ok(trimmed.to_string())
}

/// Scripted completion backend for embedding hosts and tests.
///
/// Replies are queued per [`Purpose`]. The last reply of a queue repeats;
/// a purpose with nothing queued fails.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: Mutex<HashMap<Purpose, VecDeque<Result<String, ServiceError>>>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for `purpose`.
    #[must_use]
    pub fn reply(self, purpose: Purpose, reply: Result<String, ServiceError>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(purpose).or_default().push_back(reply);
        }
        self
    }

    /// Queues a successful reply for `purpose`.
    #[must_use]
    pub fn ok(self, purpose: Purpose, text: impl Into<String>) -> Self {
        self.reply(purpose, Ok(text.into()))
    }

    /// Queues a failure for `purpose`.
    #[must_use]
    pub fn fail(self, purpose: Purpose) -> Self {
        self.reply(purpose, Err(ServiceError::failed(SERVICE, "scripted failure")))
    }

    /// Requests received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of requests received for `purpose`.
    #[must_use]
    pub fn call_count(&self, purpose: Purpose) -> usize {
        self.calls().iter().filter(|c| c.purpose == purpose).count()
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| ServiceError::failed(SERVICE, "poisoned lock"))?;
        let queue = replies.entry(request.purpose).or_default();
        match queue.len() {
            0 => Err(ServiceError::failed(SERVICE, format!("no reply scripted for {:?}", request.purpose))),
            1 => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ServiceError::failed(SERVICE, "empty script"))),
            _ => queue
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::failed(SERVICE, "empty script"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn questions_are_schema_checked() {
        assert_eq!(
            parse_questions(r#"{"questions": ["A?", "  ", 3, "B?"]}"#).unwrap(),
            vec!["A?", "B?"]
        );
        assert!(parse_questions(r#"{"questions": "A?"}"#).is_err());
        assert!(parse_questions("[1, 2]").is_err());
        assert!(parse_questions("not json").is_err());
    }

    #[test]
    fn fenced_json_is_accepted() {
        let reply = "```json\n{\"questions\": [\"A?\"]}\n```";
        assert_eq!(parse_questions(reply).unwrap(), vec!["A?"]);
    }

    #[test]
    fn evaluation_requires_known_statuses() {
        let ok = parse_evaluation(
            r#"{"subquestion_statuses": [
                {"question": "Q1", "status": "satisfied", "rationale": "found"},
                {"question": "Q2", "status": "stale"}
            ], "needs_web": false}"#,
        )
        .unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[1].status, Status::Stale);
        assert_eq!(ok[1].rationale, "");

        let bad = parse_evaluation(r#"{"subquestion_statuses": [{"question": "Q", "status": "maybe"}]}"#);
        assert!(matches!(bad, Err(ServiceError::Malformed { .. })));
        assert!(parse_evaluation(r#"{"needs_web": true}"#).is_err());
    }

    #[test]
    fn facts_take_defaults() {
        let facts = parse_facts(
            r#"{"facts": [
                {"subject": "Remote work", "predicate": "improves", "object": "focus", "confidence": 0.9},
                {"subject": "", "object": null, "confidence": 3},
                "not an object"
            ]}"#,
        )
        .unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].predicate, "improves");
        assert_eq!(facts[1].subject, "unknown");
        assert_eq!(facts[1].predicate, "related to");
        assert_eq!(facts[1].object, "unknown");
        assert!((facts[1].confidence - 1.0).abs() < f32::EPSILON);

        assert!(parse_facts(r#"{"facts": {"subject": "x"}}"#).unwrap().is_empty());
        assert!(parse_facts("nope").is_err());
    }

    #[test]
    fn missing_confidence_defaults_to_half() {
        let facts = parse_facts(r#"{"facts": [{"subject": "a", "predicate": "b", "object": "c"}]}"#).unwrap();
        assert!((facts[0].confidence - ExtractedFact::DEFAULT_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn scripted_replies_pop_then_repeat() {
        let svc = ScriptedCompletion::new()
            .ok(Purpose::Summary, "one")
            .ok(Purpose::Summary, "two");
        let req = CompletionRequest::user(Purpose::Summary, "p");
        assert_eq!(svc.complete(&req).unwrap(), "one");
        assert_eq!(svc.complete(&req).unwrap(), "two");
        assert_eq!(svc.complete(&req).unwrap(), "two");
        assert!(svc
            .complete(&CompletionRequest::user(Purpose::Report, "p"))
            .is_err());
        assert_eq!(svc.call_count(Purpose::Summary), 3);
    }

    #[test]
    fn scripted_failure_follows_success_and_repeats() {
        let svc = ScriptedCompletion::new()
            .ok(Purpose::Evaluation, "{}")
            .fail(Purpose::Evaluation);
        let req = CompletionRequest::user(Purpose::Evaluation, "p");
        assert_eq!(svc.complete(&req).unwrap(), "{}");
        for _ in 0..2 {
            let err = svc.complete(&req).unwrap_err();
            assert!(matches!(err, ServiceError::Failed { .. }));
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn request_builders() {
        let req = CompletionRequest::user(Purpose::Report, "draft")
            .with_system("sys")
            .with_temperature(0.3)
            .json();
        assert_eq!(req.prompt(), "draft");
        assert_eq!(req.messages[0].role, Role::System);
        assert!(req.json_mode);
        assert_eq!(req.temperature, Some(0.3));
        assert!(non_empty_text("   ".to_string()).is_err());
    }
}
