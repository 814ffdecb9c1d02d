//! Question normalization and fuzzy matching.
//!
//! A normalized key is the lower-cased question with surrounding punctuation
//! trimmed and a fixed set of filler words removed. Keys are compared by
//! Jaccard similarity over their whitespace tokens.

use std::collections::HashSet;

/// Filler words removed from questions before comparison.
pub const STOP_WORDS: [&str; 10] = [
    "what", "are", "is", "how", "does", "do", "the", "latest", "most", "key",
];

/// Minimum similarity for a fuzzy match to be accepted.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.8;

fn normalize_once(q: &str) -> String {
    let lowered = q.to_lowercase();
    lowered
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .split_whitespace()
        .filter(|token| !STOP_WORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonicalizes a free-text question into a comparable key.
///
/// Dropping a filler word can expose punctuation at the new edges
/// (`"what ,x"`), so the pass is repeated until it reaches a fixed point.
/// Every pass only removes characters, which bounds the loop and makes the
/// function idempotent.
#[must_use]
pub fn normalize(q: &str) -> String {
    let mut current = normalize_once(q);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn token_set(key: &str) -> HashSet<&str> {
    key.split_whitespace().collect()
}

/// Jaccard index over the token sets of two normalized keys.
///
/// Returns 0.0 when either side has no tokens.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = token_set(a);
    let right = token_set(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    #[allow(clippy::cast_precision_loss)]
    let score = intersection as f64 / union as f64;
    score
}

/// The best-scoring candidate of a fuzzy scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch<T> {
    pub candidate: T,
    pub score: f64,
}

/// Picks the single highest-scoring candidate and accepts it if it reaches
/// [`FUZZY_MATCH_THRESHOLD`].
///
/// `key_of` must return the candidate's normalized key. Ties keep the first
/// candidate encountered.
pub fn best_match<T, I, F>(query_key: &str, candidates: I, key_of: F) -> Option<FuzzyMatch<T>>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> String,
{
    let mut best: Option<FuzzyMatch<T>> = None;
    for candidate in candidates {
        let score = similarity(query_key, &key_of(&candidate));
        let better = match &best {
            Some(current) => score > current.score,
            None => score > 0.0,
        };
        if better {
            best = Some(FuzzyMatch { candidate, score });
        }
    }
    best.filter(|m| m.score >= FUZZY_MATCH_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_case_punctuation_and_stop_words() {
        assert_eq!(normalize("What are the latest trends?"), "trends");
        assert_eq!(normalize("What are the key trends?"), "trends");
        assert_eq!(normalize("  HOW does Remote Work affect productivity?!"), "remote work affect productivity");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("What is the?"), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "What are the latest trends?",
            "what ,x",
            "(what) is x",
            "a . b?",
            "x the .",
            "Is the \"most\" key thing... the latest?",
            "ÉTÉ: what is Été?",
        ];
        for q in samples {
            let once = normalize(q);
            assert_eq!(normalize(&once), once, "not idempotent for {q:?}");
        }
    }

    #[test]
    fn normalize_exposes_new_edge_punctuation() {
        assert_eq!(normalize("what ,x"), "x");
    }

    #[test]
    fn similarity_is_jaccard_over_tokens() {
        assert!((similarity("remote work", "remote work") - 1.0).abs() < f64::EPSILON);
        assert!((similarity("remote work", "remote teams") - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(similarity("", "anything"), 0.0);
        assert_eq!(similarity("anything", ""), 0.0);
    }

    #[test]
    fn paraphrases_fuzzy_match() {
        let q = normalize("What are the latest trends?");
        let keys = vec![normalize("What are the key trends?")];
        let m = best_match(&q, keys.iter(), |k| (*k).clone()).unwrap();
        assert!((m.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn below_threshold_is_rejected() {
        let keys = vec!["remote work adoption".to_string()];
        // 2 / 4 = 0.5
        assert!(best_match("remote work trends", keys.iter(), |k| (*k).clone()).is_none());
    }

    #[test]
    fn ties_keep_first_encountered() {
        let keys = vec![
            ("first", "alpha beta".to_string()),
            ("second", "alpha beta".to_string()),
        ];
        let m = best_match("alpha beta", keys.iter(), |(_, k)| k.clone()).unwrap();
        assert_eq!(m.candidate.0, "first");
    }

    #[test]
    fn highest_score_wins_over_order() {
        let keys = vec![
            "a b c d e".to_string(),
            "a b c d".to_string(),
        ];
        // 4/5 = 0.8 then 4/4 = 1.0
        let m = best_match("a b c d", keys.iter(), |k| (*k).clone()).unwrap();
        assert_eq!(m.candidate, "a b c d");
    }
}
