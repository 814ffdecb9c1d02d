//! OpenAI-compatible chat-completion backend.

use std::time::Duration;

use serde_json::{json, Value};

use crate::completion::{CompletionRequest, CompletionService};
use crate::config::CompletionSection;
use crate::error::ServiceError;

const SERVICE: &str = "completion";

/// Blocking client for a `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompletion {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key_env: String,
    timeout_secs: u64,
}

impl OpenAiCompletion {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key_env: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::failed(SERVICE, format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: api_key_env.into(),
            timeout_secs,
        })
    }

    /// Builds a client from a `[completion]` section.
    pub fn from_config(completion: &CompletionSection) -> Result<Self, ServiceError> {
        Self::new(
            completion.base_url.clone(),
            completion.model.clone(),
            completion.api_key_env.clone(),
            completion.timeout_secs,
        )
    }

    fn body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
        });
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }
}

impl CompletionService for OpenAiCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::MissingCredential {
                variable: self.api_key_env.clone(),
            })?;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&self.body(request))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout {
                        service: SERVICE.to_string(),
                        duration_ms: self.timeout_secs * 1000,
                    }
                } else {
                    ServiceError::failed(SERVICE, format!("request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::failed(SERVICE, format!("HTTP {}", response.status())));
        }

        let payload: Value = response
            .json()
            .map_err(|e| ServiceError::malformed(SERVICE, format!("failed to parse response: {e}")))?;
        payload
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::malformed(SERVICE, "no message content in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::completion::Purpose;

    #[test]
    fn configured_model_and_options_reach_the_body() {
        let section = CompletionSection {
            model: "test-model".to_string(),
            api_key_env: "RESEARCH_GATE_TEST_UNSET_COMPLETION_KEY".to_string(),
            ..CompletionSection::default()
        };
        let client = OpenAiCompletion::from_config(&section).unwrap();
        let request = CompletionRequest::user(Purpose::Subquestions, "p")
            .json()
            .with_max_tokens(200)
            .with_temperature(0.5);
        let body = client.body(&request);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(body["temperature"], 0.5);

        let err = client.complete(&request).unwrap_err();
        assert!(err.to_string().contains("RESEARCH_GATE_TEST_UNSET_COMPLETION_KEY"));
    }
}
