//! Web research collaborators: search, page fetch and page-text extraction.
//!
//! The traits are always available; the network-backed implementations are
//! compiled with the `web` feature.

use std::collections::HashMap;
use std::sync::Mutex;

use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

#[cfg(feature = "web")]
mod fetch;
#[cfg(feature = "web")]
mod openai;
#[cfg(feature = "web")]
mod serpapi;

#[cfg(feature = "web")]
pub use fetch::HttpFetcher;
#[cfg(feature = "web")]
pub use openai::OpenAiCompletion;
#[cfg(feature = "web")]
pub use serpapi::SerpApiSearch;

/// Page text is cut to this many characters, then `...` is appended.
pub const MAX_PAGE_CHARS: usize = 8000;

/// Below this many characters the `<body>` text is tried instead.
pub const BODY_FALLBACK_CHARS: usize = 500;

/// Elements whose content never counts as page text.
const SKIPPED_ELEMENTS: [&str; 8] = ["script", "style", "nav", "footer", "header", "aside", "iframe", "noscript"];

/// One organic search hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: Option<String>,
    pub link: Option<String>,
    pub snippet: Option<String>,
    pub source: Option<String>,
    pub position: Option<u32>,
}

impl SearchResult {
    #[must_use]
    pub fn link(link: impl Into<String>) -> Self {
        Self {
            link: Some(link.into()),
            ..Self::default()
        }
    }
}

/// Web search backend.
pub trait SearchService: Send + Sync {
    /// Fails with [`ServiceError::MissingCredential`] when the backend cannot
    /// authenticate. Called once before any search of a run.
    fn check_credentials(&self) -> Result<(), ServiceError>;

    /// Returns at most `num_results` organic results for `query`.
    fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchResult>, ServiceError>;
}

/// A fetched page. `text` is `None` for non-HTML responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub title: Option<String>,
    pub text: Option<String>,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
}

impl FetchedPage {
    /// Builds a page from an HTML body the way a fetcher would.
    #[must_use]
    pub fn from_html(url: impl Into<String>, html: &str) -> Self {
        let extracted = extract_page_text(html);
        Self {
            url: url.into(),
            title: extracted.title,
            text: Some(extracted.text),
            status_code: Some(200),
            content_type: Some("text/html".to_string()),
        }
    }

    /// Non-empty page text, if any.
    #[must_use]
    pub fn usable_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Page fetch backend. Connection and HTTP errors are `Err`.
pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedPage, ServiceError>;
}

/// True when the response is HTML by header or by sniffing the body.
#[must_use]
pub fn is_html(content_type: &str, body: &str) -> bool {
    if content_type.contains("text/html") {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("<html") || lower.contains("<body")
}

/// Title and cleaned text of an HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub title: Option<String>,
    pub text: String,
}

/// Appends the text under `element` to `out`, one space after each text
/// node, leaving out skipped elements and comments.
fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn first_element<'a>(root: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == name)
}

/// Trims lines, splits them on double spaces and drops empty pieces.
fn clean_text(raw: &str) -> String {
    raw.lines()
        .flat_map(|line| line.trim().split("  "))
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

/// Extracts the title and readable text of an HTML document.
///
/// Text shorter than [`BODY_FALLBACK_CHARS`] is replaced by the `<body>`
/// text when that is longer.
#[must_use]
pub fn extract_page_text(html: &str) -> ExtractedText {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title = first_element(root, "title")
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let mut raw = String::new();
    collect_text(root, &mut raw);
    let mut text = clean_text(&raw);

    if text.chars().count() < BODY_FALLBACK_CHARS {
        if let Some(body) = first_element(root, "body") {
            let mut raw_body = String::new();
            collect_text(body, &mut raw_body);
            let body_text = clean_text(&raw_body);
            if body_text.chars().count() > text.chars().count() {
                tracing::debug!("using body text fallback");
                text = body_text;
            }
        }
    }

    ExtractedText {
        title,
        text: truncate_chars(text, MAX_PAGE_CHARS),
    }
}

/// Search backend answering from a fixed table, for hosts without network
/// access and for tests.
#[derive(Debug, Default)]
pub struct StaticSearch {
    results: HashMap<String, Vec<SearchResult>>,
    missing_credential: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `query` with the given links.
    #[must_use]
    pub fn with_links<I, S>(mut self, query: impl Into<String>, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let results = links
            .into_iter()
            .enumerate()
            .map(|(i, link)| SearchResult {
                position: u32::try_from(i + 1).ok(),
                ..SearchResult::link(link)
            })
            .collect();
        self.results.insert(query.into(), results);
        self
    }

    /// Makes [`SearchService::check_credentials`] fail for `variable`.
    #[must_use]
    pub fn without_credential(mut self, variable: impl Into<String>) -> Self {
        self.missing_credential = Some(variable.into());
        self
    }

    /// Queries received so far.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl SearchService for StaticSearch {
    fn check_credentials(&self) -> Result<(), ServiceError> {
        match &self.missing_credential {
            Some(variable) => Err(ServiceError::MissingCredential {
                variable: variable.clone(),
            }),
            None => Ok(()),
        }
    }

    fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchResult>, ServiceError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        let mut hits = self.results.get(query).cloned().unwrap_or_default();
        hits.truncate(num_results);
        Ok(hits)
    }
}

/// Fetcher serving pages from a fixed table. Unknown urls fail.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    pages: HashMap<String, FetchedPage>,
}

impl StaticFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `html` at `url`.
    #[must_use]
    pub fn with_html(mut self, url: impl Into<String>, html: &str) -> Self {
        let url = url.into();
        self.pages.insert(url.clone(), FetchedPage::from_html(url, html));
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: FetchedPage) -> Self {
        self.pages.insert(page.url.clone(), page);
        self
    }
}

impl PageFetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedPage, ServiceError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| ServiceError::failed("fetch", format!("no page at {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_detection_uses_header_or_body() {
        assert!(is_html("text/html; charset=utf-8", ""));
        assert!(is_html("application/octet-stream", "<HTML><body>x</body></HTML>"));
        assert!(!is_html("application/json", "{\"a\": 1}"));
    }

    #[test]
    fn extraction_drops_boilerplate_elements() {
        let html = r#"<html><head><title> Remote &amp; Hybrid </title>
            <script>var x = "<p>hidden</p>";</script><style>p{}</style></head>
            <body><nav>Home | About</nav><header>Site</header>
            <p>Hybrid work   is common.</p><!-- comment -->
            <aside>ad</aside><footer>(c) 2024</footer></body></html>"#;
        let out = extract_page_text(html);
        assert_eq!(out.title.as_deref(), Some("Remote & Hybrid"));
        assert!(out.text.contains("Hybrid work"));
        assert!(out.text.contains("is common."));
        for gone in ["hidden", "Home | About", "Site", "ad\n", "(c) 2024", "comment", "p{}"] {
            assert!(!out.text.contains(gone), "{gone} leaked into {:?}", out.text);
        }
    }

    #[test]
    fn text_is_split_on_double_spaces_into_lines() {
        assert_eq!(clean_text("  a  b \n\n c "), "a\nb\nc");
    }

    #[test]
    fn entities_decode() {
        let out = extract_page_text("<p>Fish &amp; chips &#65;&#x42; &lt;3</p>");
        assert_eq!(out.text, "Fish & chips AB <3");
    }

    #[test]
    fn attributes_never_leak_into_text() {
        let out = extract_page_text(r#"<p><a title="x > y" href="/a?b=1&amp;c">Link</a> Hello</p>"#);
        assert_eq!(out.text, "Link\nHello");
        assert!(out.title.is_none());
    }

    #[test]
    fn unclosed_script_is_dropped_to_end_of_document() {
        let out = extract_page_text("<p>Keep</p><script>var s = 1 < 2; if (a>b) {}");
        assert_eq!(out.text, "Keep");
    }

    #[test]
    fn body_text_is_kept_for_short_pages() {
        let out = extract_page_text("<html><body><p>Essential Body Text</p></body></html>");
        assert_eq!(out.text, "Essential Body Text");
    }

    #[test]
    fn fragments_without_html_element_still_parse() {
        let out = extract_page_text("<title>T</title><div><nav>menu</nav><span>one</span>  <span>two</span></div>");
        assert_eq!(out.title.as_deref(), Some("T"));
        assert_eq!(out.text, "T one\ntwo");
    }

    #[test]
    fn long_pages_are_truncated() {
        let html = format!("<p>{}</p>", "é".repeat(MAX_PAGE_CHARS + 10));
        let out = extract_page_text(&html);
        assert_eq!(out.text.chars().count(), MAX_PAGE_CHARS + 3);
        assert!(out.text.ends_with("..."));
    }

    #[test]
    fn static_backends() {
        let search = StaticSearch::new().with_links("q", ["http://a.com", "http://b.com"]);
        let hits = search.search("q", 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, Some(1));
        assert!(search.search("other", 3).unwrap().is_empty());
        assert_eq!(search.queries(), vec!["q", "other"]);
        assert!(search.check_credentials().is_ok());
        assert!(StaticSearch::new().without_credential("KEY").check_credentials().unwrap_err().is_fatal());

        let fetcher = StaticFetcher::new().with_html("http://a.com", "<title>A</title><p>body</p>");
        let page = fetcher.fetch("http://a.com").unwrap();
        assert_eq!(page.title.as_deref(), Some("A"));
        assert!(page.usable_text().is_some());
        assert!(fetcher.fetch("http://b.com").is_err());
    }
}
