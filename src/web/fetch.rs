//! Blocking HTTP page fetcher.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, USER_AGENT};

use super::{extract_page_text, is_html, FetchedPage, PageFetcher};
use crate::config::WebSection;
use crate::error::ServiceError;

const SERVICE: &str = "fetch";

/// Fetches pages over HTTP and extracts their text.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    user_agent: String,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(user_agent: impl Into<String>, timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::failed(SERVICE, format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            user_agent: user_agent.into(),
            timeout_secs,
        })
    }

    /// Uses the `[web]` user agent and fetch timeout.
    pub fn from_config(web: &WebSection) -> Result<Self, ServiceError> {
        Self::new(web.user_agent.clone(), web.fetch_timeout_secs)
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedPage, ServiceError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::Timeout {
                        service: SERVICE.to_string(),
                        duration_ms: self.timeout_secs * 1000,
                    }
                } else {
                    ServiceError::failed(SERVICE, format!("{url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::failed(SERVICE, format!("{url}: HTTP {status}")));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .map_err(|e| ServiceError::failed(SERVICE, format!("{url}: {e}")))?;

        let mut page = FetchedPage {
            url: url.to_string(),
            status_code: Some(status.as_u16()),
            content_type: Some(content_type.clone()),
            ..FetchedPage::default()
        };
        if is_html(&content_type, &body) {
            let extracted = extract_page_text(&body);
            page.title = extracted.title;
            page.text = Some(extracted.text);
        } else {
            tracing::debug!(url = %url, content_type = %content_type, "skipping non-HTML page");
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_sets_agent_and_timeout() {
        let web = WebSection {
            user_agent: "gate-test/1".to_string(),
            fetch_timeout_secs: 7,
            ..WebSection::default()
        };
        let fetcher = HttpFetcher::from_config(&web).unwrap();
        assert_eq!(fetcher.user_agent, "gate-test/1");
        assert_eq!(fetcher.timeout_secs, 7);
    }
}
