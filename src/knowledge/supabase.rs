//! Supabase pgvector knowledge base.
//!
//! Two REST calls per search:
//! 1. OpenAI embeddings for the query text
//! 2. Supabase RPC `match_documents(query_embedding, match_threshold, match_count)`

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{KnowledgeBase, KnowledgeSnippet, SearchFilters, sort_by_score};
use crate::error::RetrievalError;

/// Embedding model used at ingestion time; queries must use the same one.
pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Rows below this similarity are dropped by the database function.
const MATCH_THRESHOLD: f32 = 0.5;

/// Supabase + embeddings configuration.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: SecretString,
    pub openai_api_key: SecretString,
    pub openai_base_url: String,
    pub timeout: Duration,
}

/// Knowledge base backed by Supabase's `match_documents` RPC.
pub struct SupabaseKnowledgeBase {
    config: SupabaseConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    query_embedding: &'a [f32],
    match_threshold: f32,
    match_count: usize,
}

/// One row returned by `match_documents`.
#[derive(Debug, Deserialize)]
struct MatchRow {
    #[serde(default)]
    id: Option<serde_json::Value>,
    content: String,
    #[serde(default)]
    doc_type: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    similarity: f32,
}

impl MatchRow {
    fn into_snippet(self) -> KnowledgeSnippet {
        let source = self.source.unwrap_or_else(|| match self.id {
            Some(serde_json::Value::String(s)) => format!("documents:{s}"),
            Some(other) => format!("documents:{other}"),
            None => "documents".to_string(),
        });
        let mut snippet = KnowledgeSnippet::new(self.content, self.similarity, source).with_tags(
            self.doc_type.unwrap_or_else(|| "general".into()),
            self.category.unwrap_or_else(|| "general".into()),
        );
        if let Some(title) = self.title {
            snippet = snippet.with_title(title);
        }
        snippet
    }
}

impl SupabaseKnowledgeBase {
    pub fn new(config: SupabaseConfig) -> Result<Self, RetrievalError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RetrievalError::Unavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, http })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let url = format!(
            "{}/v1/embeddings",
            self.config.openai_base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(self.config.openai_api_key.expose_secret())
            .json(&EmbeddingRequest {
                model: EMBEDDING_MODEL,
                input: text,
            })
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            RetrievalError::InvalidResponse {
                reason: format!("embedding response: {e}"),
            }
        })?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RetrievalError::InvalidResponse {
                reason: "embedding response had no data".into(),
            })
    }

    async fn match_documents(
        &self,
        embedding: &[f32],
        count: usize,
    ) -> Result<Vec<MatchRow>, RetrievalError> {
        let url = format!(
            "{}/rest/v1/rpc/match_documents",
            self.config.url.trim_end_matches('/')
        );
        let key = self.config.service_key.expose_secret();
        let response = self
            .http
            .post(url)
            .header("apikey", key)
            .bearer_auth(key)
            .json(&MatchRequest {
                query_embedding: embedding,
                match_threshold: MATCH_THRESHOLD,
                match_count: count,
            })
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?;

        response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse {
                reason: format!("match_documents response: {e}"),
            })
    }
}

fn unavailable(e: reqwest::Error) -> RetrievalError {
    if e.is_timeout() {
        warn!("Knowledge base request timed out");
    }
    RetrievalError::Unavailable {
        reason: e.to_string(),
    }
}

#[async_trait]
impl KnowledgeBase for SupabaseKnowledgeBase {
    fn name(&self) -> &str {
        "supabase"
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<Vec<KnowledgeSnippet>, RetrievalError> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embed(query).await?;
        // Over-fetch when filtering so post-filtering still fills the limit.
        let count = if filters.is_some() { limit * 3 } else { limit };
        let rows = self.match_documents(&embedding, count).await?;

        let mut snippets: Vec<KnowledgeSnippet> = rows
            .into_iter()
            .map(MatchRow::into_snippet)
            .filter(|s| filters.is_none_or(|f| f.matches(s)))
            .collect();
        sort_by_score(&mut snippets);
        snippets.truncate(limit);

        debug!(results = snippets.len(), "Supabase search");
        Ok(snippets)
    }
}
