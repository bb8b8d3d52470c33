//! Grounding check for composed answers.
//!
//! An answer is accepted only if every number it states appears in the
//! snippets it was composed from and it shares at least one content word with
//! them. The model may instead answer with `NOT_FOUND`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::knowledge::KnowledgeSnippet;

/// Reply the answer prompt allows when the snippets do not answer the question.
pub const NOT_FOUND_SENTINEL: &str = "NOT_FOUND";

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)*").expect("number regex"));

/// Words too common to count as shared vocabulary.
const FILLER_WORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "will", "your", "their", "there", "about", "which",
    "would", "could", "should", "been", "were", "what", "when", "where", "also", "into", "than",
    "then", "they", "them", "these", "those", "only", "more", "most", "some", "such", "each",
    "other", "based", "information", "knowledge", "according",
];

/// Result of checking a composed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroundingVerdict {
    Grounded,
    /// The model declined with the sentinel.
    NotFound,
    Ungrounded { reason: String },
}

/// Check an answer against the snippets it was composed from.
pub fn check_answer(answer: &str, snippets: &[KnowledgeSnippet]) -> GroundingVerdict {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return GroundingVerdict::Ungrounded {
            reason: "empty answer".into(),
        };
    }
    if trimmed.contains(NOT_FOUND_SENTINEL) {
        return GroundingVerdict::NotFound;
    }

    let source_text: String = snippets
        .iter()
        .flat_map(|s| [s.title.as_deref().unwrap_or(""), s.content.as_str()])
        .collect::<Vec<_>>()
        .join("\n");

    let source_numbers = numbers(&source_text);
    if let Some(invented) = numbers(trimmed)
        .into_iter()
        .find(|n| !source_numbers.contains(n))
    {
        return GroundingVerdict::Ungrounded {
            reason: format!("number {invented} does not appear in the retrieved content"),
        };
    }

    let source_words = content_words(&source_text);
    if content_words(trimmed).is_disjoint(&source_words) {
        return GroundingVerdict::Ungrounded {
            reason: "answer shares no vocabulary with the retrieved content".into(),
        };
    }

    GroundingVerdict::Grounded
}

/// Numbers with thousands separators removed ("1,200" → "1200").
fn numbers(text: &str) -> HashSet<String> {
    NUMBER_RE
        .find_iter(text)
        .map(|m| {
            let n = m.as_str().replace(',', "");
            n.trim_end_matches('.').to_string()
        })
        .collect()
}

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphabetic())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 4 && !FILLER_WORDS.contains(&w.as_str()))
        .collect()
}
