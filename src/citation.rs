//! Citation validation for generated reports.
//!
//! A drafted report may only cite urls from the [`AllowedUrlSet`] of the
//! evidence actually selected for it. Membership is exact string equality.
//!
//! Three passes run in order over text no earlier pass has claimed:
//!
//! 1. Markdown links `[text](url)`.
//! 2. Parenthetical urls `(url)`.
//! 3. Bare `http(s)://` tokens, compared without trailing sentence
//!    punctuation.
//!
//! A disallowed url becomes [`SENTINEL`]. Afterwards a disclaimer is placed
//! under the Limitations heading if anything was redacted, and the
//! References section is rebuilt from the allowed set.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::selector::AllowedUrlSet;

/// Replacement text for an unverifiable citation.
pub const SENTINEL: &str = "[citation unavailable]";

pub const LIMITATIONS_HEADING: &str = "## Limitations";
pub const REFERENCES_HEADING: &str = "## References";

/// Note inserted after the Limitations heading when redactions happened.
pub const DISCLAIMER: &str = "\n> **Note:** Some claims in this report could not be linked to a verified source from the provided context and have been marked as [citation unavailable].\n";

/// Characters stripped from the end of a bare url before the membership check.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')'];

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").expect("markdown link regex must compile"))
}

fn parenthetical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((https?://[^)\s]+)\)").expect("parenthetical url regex must compile"))
}

fn bare_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s)]+").expect("bare url regex must compile"))
}

// Headings count only at the start of a line, so `### References` is body text.
fn references_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^## References").expect("references heading regex must compile"))
}

fn limitations_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^## Limitations").expect("limitations heading regex must compile"))
}

/// Text not yet claimed by a pass, or output no later pass may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Open(String),
    Settled(String),
}

/// Runs `rewrite` over every match of `re` in the open segments. The
/// rewrite returns the replacement pieces for one match.
fn apply_pass<F>(segments: Vec<Segment>, re: &Regex, rewrite: F) -> Vec<Segment>
where
    F: Fn(&regex::Captures<'_>) -> Vec<Segment>,
{
    let mut out = Vec::with_capacity(segments.len());
    for segment in segments {
        let text = match segment {
            Segment::Open(text) => text,
            settled @ Segment::Settled(_) => {
                out.push(settled);
                continue;
            }
        };
        let mut last = 0;
        for caps in re.captures_iter(&text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                out.push(Segment::Open(text[last..whole.start()].to_string()));
            }
            out.extend(rewrite(&caps));
            last = whole.end();
        }
        if last < text.len() {
            out.push(Segment::Open(text[last..].to_string()));
        }
    }
    out
}

fn group<'t>(caps: &regex::Captures<'t>, i: usize) -> &'t str {
    caps.get(i).map_or("", |m| m.as_str())
}

/// Applies the three redaction passes. Returns the rewritten text.
#[must_use]
pub fn redact_citations(draft: &str, allowed: &AllowedUrlSet) -> String {
    let segments = vec![Segment::Open(draft.to_string())];

    // Link text stays open so a url written inside it is still checked.
    let segments = apply_pass(segments, markdown_link_re(), |caps| {
        let url = group(caps, 2);
        let tail = if allowed.contains(url) {
            format!("]({url})")
        } else {
            tracing::debug!(url = %url, "redacting markdown link");
            format!("]({SENTINEL})")
        };
        vec![
            Segment::Settled("[".to_string()),
            Segment::Open(group(caps, 1).to_string()),
            Segment::Settled(tail),
        ]
    });

    let segments = apply_pass(segments, parenthetical_re(), |caps| {
        let url = group(caps, 1);
        if allowed.contains(url) {
            vec![Segment::Settled(group(caps, 0).to_string())]
        } else {
            tracing::debug!(url = %url, "redacting parenthetical citation");
            vec![Segment::Settled(SENTINEL.to_string())]
        }
    });

    let segments = apply_pass(segments, bare_url_re(), |caps| {
        let token = group(caps, 0);
        let clean = token.trim_end_matches(TRAILING_PUNCTUATION);
        if allowed.contains(clean) {
            vec![Segment::Settled(token.to_string())]
        } else {
            tracing::debug!(url = %clean, "redacting bare url");
            vec![Segment::Settled(SENTINEL.to_string())]
        }
    });

    segments
        .into_iter()
        .map(|s| match s {
            Segment::Open(t) | Segment::Settled(t) => t,
        })
        .collect()
}

/// Length of the part of `text` that survives the References rebuild.
fn body_end(text: &str) -> usize {
    references_heading_re().find(text).map_or(text.len(), |m| m.start())
}

/// Places [`DISCLAIMER`] directly after the first Limitations heading of the
/// body. Without one, a Limitations heading is added ahead of References, or
/// at the end.
fn inject_disclaimer(mut text: String) -> String {
    let end = body_end(&text);
    if let Some(heading) = limitations_heading_re().find(&text[..end]) {
        text.insert_str(heading.end(), DISCLAIMER);
        return text;
    }
    if end < text.len() {
        text.insert_str(end, &format!("{LIMITATIONS_HEADING}{DISCLAIMER}\n"));
        return text;
    }
    format!("{text}\n\n{LIMITATIONS_HEADING}{DISCLAIMER}")
}

/// Drops everything from the first References heading on and writes the
/// allowed set in its place.
fn rebuild_references(text: &str, allowed: &AllowedUrlSet) -> String {
    let body = allowed.iter().map(|u| format!("- {u}")).collect::<Vec<_>>().join("\n");
    match references_heading_re().find(text) {
        Some(heading) => format!("{}{REFERENCES_HEADING}\n\n{body}", &text[..heading.start()]),
        None => format!("{text}\n\n{REFERENCES_HEADING}\n\n{body}"),
    }
}

/// A report after citation enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedReport {
    pub text: String,
    /// Sentinel occurrences in the report body.
    pub redactions: usize,
}

/// Enforces `allowed` on a drafted report.
#[must_use]
pub fn validate(draft: &str, allowed: &AllowedUrlSet) -> ValidatedReport {
    let redacted = redact_citations(draft, allowed);
    // Redactions inside a References section the rebuild discards do not count.
    let redactions = redacted[..body_end(&redacted)].matches(SENTINEL).count();
    let with_note = if redactions > 0 {
        tracing::info!(redactions, "citations redacted from report");
        inject_disclaimer(redacted)
    } else {
        redacted
    };
    ValidatedReport {
        text: rebuild_references(&with_note, allowed),
        redactions,
    }
}
