//! retrieve_info: answer a question from the knowledge base.
//!
//! 1. Search (limit 5) and keep snippets scoring at or above the threshold
//! 2. Nothing kept → explicit not-found response
//! 3. Compose an answer from the kept snippets only
//! 4. Grounding check; a failed check (or failed call) falls back to quoting
//!    the top snippet

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::IntentHandler;
use crate::config::PipelineConfig;
use crate::error::HandlerError;
use crate::knowledge::{KnowledgeBase, KnowledgeSnippet, sort_by_score};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::message::truncate_chars;
use crate::pipeline::grounding::{GroundingVerdict, NOT_FOUND_SENTINEL, check_answer};
use crate::pipeline::router::HandlerKind;
use crate::pipeline::types::ConversationState;

pub const NOT_FOUND_RESPONSE: &str =
    "I couldn't find relevant information in the knowledge base for that question.";

pub const SEARCH_UNAVAILABLE_RESPONSE: &str =
    "I couldn't search the knowledge base right now. Please try again in a moment.";

/// Longest snippet excerpt quoted by the extractive fallback.
const EXTRACT_MAX_CHARS: usize = 400;

const ANSWER_MAX_TOKENS: u32 = 512;
const ANSWER_TEMPERATURE: f32 = 0.2;

pub struct RetrieveInfoHandler {
    knowledge: Arc<dyn KnowledgeBase>,
    llm: Arc<dyn LlmProvider>,
    threshold: f32,
    limit: usize,
}

impl RetrieveInfoHandler {
    pub fn new(
        knowledge: Arc<dyn KnowledgeBase>,
        llm: Arc<dyn LlmProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            knowledge,
            llm,
            threshold: config.relevance_threshold,
            limit: config.retrieve_limit,
        }
    }

    async fn compose(&self, question: &str, snippets: &[KnowledgeSnippet]) -> Option<String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_answer_system_prompt()),
            ChatMessage::user(build_answer_user_prompt(question, snippets)),
        ])
        .with_temperature(ANSWER_TEMPERATURE)
        .with_max_tokens(ANSWER_MAX_TOKENS);

        match self.llm.complete(request).await {
            Ok(response) => Some(response.content),
            Err(e) => {
                warn!(error = %e, "Answer composition failed, using extractive answer");
                None
            }
        }
    }
}

#[async_trait]
impl IntentHandler for RetrieveInfoHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::RetrieveInfo
    }

    async fn handle(&self, state: &mut ConversationState) -> Result<(), HandlerError> {
        let turn_id = state.id();
        let results = match self.knowledge.search(state.input(), self.limit, None).await {
            Ok(results) => results,
            Err(e) => {
                warn!(turn_id = %turn_id, error = %e, "Knowledge search failed");
                state.fail(SEARCH_UNAVAILABLE_RESPONSE);
                return Ok(());
            }
        };

        let total = results.len();
        let kept = accept_snippets(results, self.threshold);
        debug!(turn_id = %turn_id, total, kept = kept.len(), threshold = self.threshold, "Filtered snippets");
        if kept.is_empty() {
            state.respond(NOT_FOUND_RESPONSE);
            return Ok(());
        }

        let response = match self.compose(state.input(), &kept).await {
            Some(answer) => match check_answer(&answer, &kept) {
                GroundingVerdict::Grounded => answer.trim().to_string(),
                GroundingVerdict::NotFound => {
                    info!(turn_id = %turn_id, "Model found no answer in the snippets");
                    NOT_FOUND_RESPONSE.to_string()
                }
                GroundingVerdict::Ungrounded { reason } => {
                    warn!(turn_id = %turn_id, reason = %reason, "Answer failed grounding check");
                    extractive_answer(&kept[0])
                }
            },
            None => extractive_answer(&kept[0]),
        };

        state.retrieval = kept;
        state.respond(response);
        Ok(())
    }
}

/// Keep snippets scoring at or above `threshold`, best first.
pub fn accept_snippets(mut snippets: Vec<KnowledgeSnippet>, threshold: f32) -> Vec<KnowledgeSnippet> {
    snippets.retain(|s| s.score >= threshold);
    sort_by_score(&mut snippets);
    snippets
}

/// Answer that quotes the top snippet verbatim.
pub fn extractive_answer(top: &KnowledgeSnippet) -> String {
    let excerpt = truncate_chars(top.content.trim(), EXTRACT_MAX_CHARS);
    match &top.title {
        Some(title) => format!("Here's what I found in \"{title}\":\n\n{excerpt}"),
        None => format!("Here's what I found in the knowledge base:\n\n{excerpt}"),
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_answer_system_prompt() -> String {
    format!(
        "You answer questions about the business using ONLY the numbered snippets provided.\n\n\
         Rules:\n\
         - Use only facts stated in the snippets. Do not add numbers, names, dates, or policies that are not in them.\n\
         - Keep the answer short (2-4 sentences) and conversational.\n\
         - If the snippets do not answer the question, reply with exactly {NOT_FOUND_SENTINEL}."
    )
}

fn build_answer_user_prompt(question: &str, snippets: &[KnowledgeSnippet]) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(&format!("Question: {question}\n\nSnippets:\n"));
    for (i, snippet) in snippets.iter().enumerate() {
        match &snippet.title {
            Some(title) => prompt.push_str(&format!("[{}] {title}: {}\n", i + 1, snippet.content)),
            None => prompt.push_str(&format!("[{}] {}\n", i + 1, snippet.content)),
        }
    }
    prompt
}
