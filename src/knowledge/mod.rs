//! Retrieval client: scored knowledge snippets for a query.
//!
//! The pipeline only sees the `KnowledgeBase` trait. Two backends ship:
//! - `SupabaseKnowledgeBase`: pgvector similarity search over REST
//! - `InMemoryKnowledgeBase`: lexical scoring over a JSON document file

pub mod memory;
pub mod supabase;

pub use memory::{InMemoryKnowledgeBase, KnowledgeDocument};
pub use supabase::{SupabaseConfig, SupabaseKnowledgeBase};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// One retrieved unit of business knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub content: String,
    /// Similarity in [0, 1].
    pub score: f32,
    pub doc_type: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Where the snippet came from (document id, file, URL).
    pub source: String,
}

impl KnowledgeSnippet {
    pub fn new(content: impl Into<String>, score: f32, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            score: clamp_score(score),
            doc_type: "general".into(),
            category: "general".into(),
            title: None,
            source: source.into(),
        }
    }

    pub fn with_tags(mut self, doc_type: impl Into<String>, category: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self.category = category.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Optional type/category filter for a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub doc_type: Option<String>,
    pub category: Option<String>,
}

impl SearchFilters {
    pub fn doc_type(doc_type: impl Into<String>) -> Self {
        Self {
            doc_type: Some(doc_type.into()),
            category: None,
        }
    }

    /// Whether a snippet passes this filter (case-insensitive).
    pub fn matches(&self, snippet: &KnowledgeSnippet) -> bool {
        let type_ok = self
            .doc_type
            .as_ref()
            .is_none_or(|t| t.eq_ignore_ascii_case(&snippet.doc_type));
        let category_ok = self
            .category
            .as_ref()
            .is_none_or(|c| c.eq_ignore_ascii_case(&snippet.category));
        type_ok && category_ok
    }
}

/// Knowledge-base search.
///
/// Results are ordered by descending score. Transport or storage failures
/// (including timeouts) surface as `RetrievalError::Unavailable`.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Backend name, for health reporting.
    fn name(&self) -> &str;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<KnowledgeSnippet>, RetrievalError>;
}

/// Clamp a raw similarity into [0, 1]; NaN becomes 0.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Sort snippets by descending score (stable for ties).
pub fn sort_by_score(snippets: &mut [KnowledgeSnippet]) {
    snippets.sort_by(|a, b| b.score.total_cmp(&a.score));
}
