//! In-memory knowledge base with lexical overlap scoring.
//!
//! Documents come from a JSON array (same shape the ingestion scripts feed to
//! the vector store). Score = fraction of distinct query terms present in the
//! document, so a query whose every term appears scores 1.0.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{KnowledgeBase, KnowledgeSnippet, SearchFilters, sort_by_score};
use crate::error::RetrievalError;

/// Words that carry no retrieval signal.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "whats", "our", "your", "you", "how", "who", "why",
    "when", "where", "which", "does", "did", "can", "could", "would", "should", "with", "this",
    "that", "from", "about", "have", "has", "any", "tell", "please", "there", "their", "its",
    "into", "will", "all", "get", "give", "me", "is", "do", "of", "to", "in", "on", "an", "a",
];

/// A document as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default = "default_tag")]
    pub doc_type: String,
    #[serde(default = "default_tag")]
    pub category: String,
    #[serde(default)]
    pub source: Option<String>,
}

fn default_tag() -> String {
    "general".to_string()
}

struct IndexedDocument {
    doc: KnowledgeDocument,
    terms: HashSet<String>,
}

/// Knowledge base held entirely in memory.
pub struct InMemoryKnowledgeBase {
    documents: Vec<IndexedDocument>,
}

impl InMemoryKnowledgeBase {
    pub fn new(documents: Vec<KnowledgeDocument>) -> Self {
        let documents = documents
            .into_iter()
            .filter(|d| !d.content.trim().is_empty())
            .map(|doc| {
                let mut text = doc.content.clone();
                if let Some(ref title) = doc.title {
                    text.push(' ');
                    text.push_str(title);
                }
                IndexedDocument {
                    terms: terms(&text),
                    doc,
                }
            })
            .collect();
        Self { documents }
    }

    /// Empty knowledge base (every search returns nothing).
    pub fn empty() -> Self {
        Self {
            documents: Vec::new(),
        }
    }

    /// Load documents from a JSON array file.
    pub async fn from_file(path: &Path) -> Result<Self, RetrievalError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::Load(format!("{}: {e}", path.display())))?;
        let documents: Vec<KnowledgeDocument> = serde_json::from_str(&raw)
            .map_err(|e| RetrievalError::Load(format!("{}: {e}", path.display())))?;
        let kb = Self::new(documents);
        info!(path = %path.display(), documents = kb.len(), "Loaded knowledge documents");
        Ok(kb)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Lowercased, de-punctuated terms of at least three characters, minus stopwords.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .map(|w| stem(&w))
        .collect()
}

/// Crude plural folding so "refunds" matches "refund".
fn stem(word: &str) -> String {
    if word.len() > 4 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<KnowledgeSnippet>, RetrievalError> {
        let query_terms = terms(query);
        if query_terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut results: Vec<KnowledgeSnippet> = self
            .documents
            .iter()
            .enumerate()
            .filter_map(|(i, indexed)| {
                let hits = query_terms
                    .iter()
                    .filter(|t| indexed.terms.contains(*t))
                    .count();
                if hits == 0 {
                    return None;
                }
                let score = hits as f32 / query_terms.len() as f32;
                let doc = &indexed.doc;
                let source = doc
                    .source
                    .clone()
                    .unwrap_or_else(|| format!("memory:{i}"));
                let mut snippet = KnowledgeSnippet::new(&doc.content, score, source)
                    .with_tags(&doc.doc_type, &doc.category);
                if let Some(ref title) = doc.title {
                    snippet = snippet.with_title(title);
                }
                Some(snippet)
            })
            .filter(|s| filters.is_none_or(|f| f.matches(s)))
            .collect();

        sort_by_score(&mut results);
        results.truncate(limit);
        debug!(query_terms = query_terms.len(), hits = results.len(), "In-memory search");
        Ok(results)
    }
}
