//! Intent classifier — one constrained generation call per turn.
//!
//! The model is asked for `{"intent": "<label>"}` and the reply is decoded
//! through the closed `Intent` enum. Anything that does not decode is a
//! constraint violation, and every failure resolves to `Intent::Unknown`.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Intent;

/// Longest input (in chars) sent to the classifier.
pub const MAX_CLASSIFIER_INPUT_CHARS: usize = 2000;

/// Max tokens for the classification call.
const CLASSIFY_MAX_TOKENS: u32 = 32;

/// Classification must be deterministic.
const CLASSIFY_TEMPERATURE: f32 = 0.0;

/// Maps free-form text to exactly one `Intent`.
pub struct IntentClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Classify an utterance. Never fails: errors resolve to `Unknown`.
    pub async fn classify(&self, input: &str, context: &[String]) -> Intent {
        if input.trim().is_empty() {
            debug!("Empty input, classifying as unknown");
            return Intent::Unknown;
        }

        match self.try_classify(input, context).await {
            Ok(intent) => {
                debug!(intent = %intent, model = self.llm.model_name(), "Classified input");
                intent
            }
            Err(e) => {
                warn!(error = %e, "Classification failed, falling back to unknown");
                Intent::Unknown
            }
        }
    }

    async fn try_classify(&self, input: &str, context: &[String]) -> Result<Intent, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classifier_system_prompt()),
            ChatMessage::user(build_classifier_user_prompt(input, context)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        decode_intent(&response.content)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_classifier_system_prompt() -> String {
    "You are the intent classifier for an email assistant. \
     Classify the user's request into exactly ONE intent:\n\n\
     - \"draft_email\": compose or write an email\n\
     - \"retrieve_info\": a question about the business, its policies, products, or documents\n\
     - \"manage_inbox\": label, archive, or organize emails\n\
     - \"read_email\": read, list, or review emails in the inbox\n\
     - \"unknown\": anything else\n\n\
     Respond with ONLY a JSON object: {\"intent\": \"<one of the labels above>\"}"
        .to_string()
}

fn build_classifier_user_prompt(input: &str, context: &[String]) -> String {
    let mut prompt = String::with_capacity(256);
    if !context.is_empty() {
        prompt.push_str("Recent conversation:\n");
        for line in context {
            let preview: String = line.chars().take(200).collect();
            prompt.push_str(&format!("- {preview}\n"));
        }
        prompt.push('\n');
    }
    let text: String = input.chars().take(MAX_CLASSIFIER_INPUT_CHARS).collect();
    prompt.push_str(&format!("User request: {text}"));
    prompt
}

// ── Response decoding ───────────────────────────────────────────────

#[derive(Deserialize)]
struct ClassifierReply {
    intent: String,
}

/// Decode a classifier reply into an `Intent`.
///
/// Accepts `{"intent": "<label>"}` (optionally fenced) or a bare label token,
/// any case. Everything else is a `ConstraintViolation`.
pub fn decode_intent(raw: &str) -> Result<Intent, LlmError> {
    let json_str = extract_json_object(raw);
    let label = if json_str.starts_with('{') {
        let reply: ClassifierReply =
            serde_json::from_str(&json_str).map_err(|e| LlmError::ConstraintViolation {
                reason: format!("classifier reply is not the expected object: {e}"),
            })?;
        reply.intent
    } else {
        let token = raw.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '.');
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(LlmError::ConstraintViolation {
                reason: format!("classifier reply is not a label: {raw:?}"),
            });
        }
        token.to_string()
    };

    let normalized = label.trim().to_lowercase();
    serde_json::from_value(serde_json::Value::String(normalized)).map_err(|_| {
        LlmError::ConstraintViolation {
            reason: format!("label outside the intent set: {label:?}"),
        }
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
