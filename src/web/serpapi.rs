//! SerpAPI search backend.

use std::time::Duration;

use serde::Deserialize;

use super::{SearchResult, SearchService};
use crate::config::WebSection;
use crate::error::ServiceError;

const SERVICE: &str = "search";
const ENDPOINT: &str = "https://serpapi.com/search.json";

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    organic_results: Vec<SearchResult>,
}

/// Google search through SerpAPI. The key is read from the environment on
/// every call, never stored.
#[derive(Debug, Clone)]
pub struct SerpApiSearch {
    client: reqwest::blocking::Client,
    api_key_env: String,
    timeout_secs: u64,
}

impl SerpApiSearch {
    pub fn new(api_key_env: impl Into<String>, timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::failed(SERVICE, format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key_env: api_key_env.into(),
            timeout_secs,
        })
    }

    /// Reads the key from `[web].search_api_key_env`, with the fetch timeout.
    pub fn from_config(web: &WebSection) -> Result<Self, ServiceError> {
        Self::new(web.search_api_key_env.clone(), web.fetch_timeout_secs)
    }

    fn api_key(&self) -> Result<String, ServiceError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::MissingCredential {
                variable: self.api_key_env.clone(),
            })
    }
}

impl SearchService for SerpApiSearch {
    fn check_credentials(&self) -> Result<(), ServiceError> {
        self.api_key().map(|_| ())
    }

    fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchResult>, ServiceError> {
        let key = self.api_key()?;
        let num = num_results.to_string();
        let response = self
            .client
            .get(ENDPOINT)
            .query(&[("q", query), ("num", num.as_str()), ("api_key", key.as_str()), ("engine", "google")])
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

        let body: SerpResponse = response
            .json()
            .map_err(|e| ServiceError::malformed(SERVICE, e.to_string()))?;
        if let Some(error) = body.error {
            return Err(ServiceError::failed(SERVICE, error));
        }

        let mut results = body.organic_results;
        results.truncate(num_results);
        tracing::debug!(query = %query, results = results.len(), "search completed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_key_variable_is_checked() {
        let web = WebSection {
            search_api_key_env: "RESEARCH_GATE_TEST_UNSET_SEARCH_KEY".to_string(),
            ..WebSection::default()
        };
        let search = SerpApiSearch::from_config(&web).unwrap();
        let err = search.check_credentials().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("RESEARCH_GATE_TEST_UNSET_SEARCH_KEY"));
        assert!(search.search("q", 3).unwrap_err().is_fatal());
    }
}
