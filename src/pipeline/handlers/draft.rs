//! draft_email: compose a subject + body draft from the request and any
//! template/policy context in the knowledge base.
//!
//! **The draft is never sent here.** Sending is a separate, explicit action
//! (`send_draft`).

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::IntentHandler;
use crate::config::PipelineConfig;
use crate::error::{HandlerError, MailError};
use crate::knowledge::{KnowledgeBase, KnowledgeSnippet, sort_by_score};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::mail::{MailClient, MailCommand, MailResult};
use crate::pipeline::classifier::extract_json_object;
use crate::pipeline::router::HandlerKind;
use crate::pipeline::types::{ConversationState, EmailDraft};

const DRAFT_MAX_TOKENS: u32 = 1024;
const DRAFT_TEMPERATURE: f32 = 0.7;

const DRAFT_UNAVAILABLE_RESPONSE: &str =
    "I couldn't draft that email right now. Please try again in a moment.";

/// Prefixed to a draft written while the knowledge base could not be searched.
pub const UNVERIFIED_DRAFT_NOTICE: &str =
    "I couldn't check the knowledge base, so policy details in this draft are unverified.";

const DRAFT_UNUSABLE_RESPONSE: &str =
    "I couldn't put together a usable draft for that. Could you tell me more about what the email should say?";

static EMAIL_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w.+\-]+@[\w\-]+(?:\.[\w\-]+)+").expect("email address regex")
});

/// Result of the template/policy context search.
#[derive(Debug)]
enum DraftContext {
    Found(Vec<KnowledgeSnippet>),
    /// The search failed; nothing in the draft could be checked.
    Unavailable,
}

pub struct DraftEmailHandler {
    knowledge: Arc<dyn KnowledgeBase>,
    llm: Arc<dyn LlmProvider>,
    context_limit: usize,
    context_min_score: f32,
}

impl DraftEmailHandler {
    pub fn new(
        knowledge: Arc<dyn KnowledgeBase>,
        llm: Arc<dyn LlmProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            knowledge,
            llm,
            context_limit: config.draft_context_limit,
            context_min_score: config.draft_context_min_score,
        }
    }

    /// Template/policy context snippets scoring at least `context_min_score`.
    async fn context(&self, state: &ConversationState) -> DraftContext {
        match self
            .knowledge
            .search(state.input(), self.context_limit, None)
            .await
        {
            Ok(mut snippets) => {
                snippets.retain(|s| s.score >= self.context_min_score);
                sort_by_score(&mut snippets);
                DraftContext::Found(snippets)
            }
            Err(e) => {
                warn!(turn_id = %state.id(), error = %e, "Draft context search failed, draft will be marked unverified");
                DraftContext::Unavailable
            }
        }
    }
}

#[async_trait]
impl IntentHandler for DraftEmailHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::DraftEmail
    }

    async fn handle(&self, state: &mut ConversationState) -> Result<(), HandlerError> {
        let turn_id = state.id();
        let (context, verified) = match self.context(state).await {
            DraftContext::Found(snippets) => (snippets, true),
            DraftContext::Unavailable => (Vec::new(), false),
        };
        let recipient = extract_recipient(state.input());
        debug!(turn_id = %turn_id, context = context.len(), has_recipient = recipient.is_some(), "Drafting email");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_draft_system_prompt()),
            ChatMessage::user(build_draft_user_prompt(
                state.input(),
                recipient.as_deref(),
                &context,
                verified,
            )),
        ])
        .with_temperature(DRAFT_TEMPERATURE)
        .with_max_tokens(DRAFT_MAX_TOKENS);

        let reply = match self.llm.complete(request).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!(turn_id = %turn_id, error = %e, "Draft generation failed");
                state.fail(DRAFT_UNAVAILABLE_RESPONSE);
                return Ok(());
            }
        };

        let Some((subject, body)) = parse_draft(&reply) else {
            warn!(turn_id = %turn_id, raw_response = %reply, "Could not parse draft");
            state.fail(DRAFT_UNUSABLE_RESPONSE);
            return Ok(());
        };

        let draft = EmailDraft {
            to: recipient,
            subject,
            body,
            sources: context.iter().map(|s| s.source.clone()).collect(),
        };
        info!(turn_id = %turn_id, subject = %draft.subject, verified, "Draft ready");

        if verified {
            state.respond(describe_draft(&draft));
        } else {
            state.fail(format!("{UNVERIFIED_DRAFT_NOTICE}\n\n{}", describe_draft(&draft)));
        }
        state.retrieval = context;
        state.draft = Some(draft);
        Ok(())
    }
}

/// Send a draft through the mail client. The only path from draft to `Send`.
pub async fn send_draft(mail: &dyn MailClient, draft: &EmailDraft) -> Result<MailResult, MailError> {
    let to = draft
        .to
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| MailError::InvalidCommand {
            reason: "the draft has no recipient".into(),
        })?;

    info!(to, subject = %draft.subject, "Sending approved draft");
    mail.execute(MailCommand::Send {
        to: to.to_string(),
        subject: draft.subject.clone(),
        body: draft.body.clone(),
    })
    .await
}

fn extract_recipient(input: &str) -> Option<String> {
    EMAIL_ADDRESS_RE
        .find(input)
        .map(|m| m.as_str().trim_end_matches('.').to_string())
}

fn describe_draft(draft: &EmailDraft) -> String {
    let mut text = String::from("I've drafted an email for you:\n\n");
    if let Some(ref to) = draft.to {
        text.push_str(&format!("To: {to}\n"));
    }
    text.push_str(&format!("Subject: {}\n\n{}\n\n", draft.subject, draft.body));
    text.push_str("Would you like me to send it or make changes?");
    text
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_draft_system_prompt() -> String {
    "You are an email drafting assistant. Write a professional, friendly email \
     based on the user's request and any reference material provided.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"subject\": \"...\", \"body\": \"...\"}\n\n\
     Rules:\n\
     - Follow the tone and structure of any template in the reference material\n\
     - Only state policies or facts that appear in the reference material or the request\n\
     - Leave placeholders like [Name] where details are missing; do not invent them\n\
     - Do not include the subject line inside the body"
        .to_string()
}

fn build_draft_user_prompt(
    request: &str,
    recipient: Option<&str>,
    context: &[KnowledgeSnippet],
    verified: bool,
) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(&format!("Request: {request}\n"));
    if let Some(to) = recipient {
        prompt.push_str(&format!("Recipient: {to}\n"));
    }
    if !verified {
        prompt.push_str(
            "\nReference material could not be loaded. Do not state any policy, price, \
             deadline, or other fact; use placeholders like [policy details] instead.\n",
        );
    }
    if !context.is_empty() {
        prompt.push_str("\nReference material:\n");
        for snippet in context {
            let title = snippet.title.as_deref().unwrap_or(&snippet.doc_type);
            let preview: String = snippet.content.chars().take(1500).collect();
            prompt.push_str(&format!("--- {title} ---\n{preview}\n"));
        }
    }
    prompt
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DraftReply {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

/// Parse a draft reply into `(subject, body)`.
///
/// Accepts the requested JSON object, or plain text with a leading
/// `Subject:` line.
pub fn parse_draft(raw: &str) -> Option<(String, String)> {
    let json_str = extract_json_object(raw);
    if let Ok(reply) = serde_json::from_str::<DraftReply>(&json_str) {
        let body = reply.body.trim().to_string();
        if body.is_empty() {
            return None;
        }
        let subject = match reply.subject.trim() {
            "" => "(no subject)".to_string(),
            s => s.to_string(),
        };
        return Some((subject, body));
    }

    let mut lines = raw.trim().lines();
    let subject = lines.by_ref().find_map(|line| {
        let line = line.trim().trim_start_matches("**");
        let (key, value) = line.split_once(':')?;
        key.trim_end_matches("**")
            .eq_ignore_ascii_case("subject")
            .then(|| value.trim().trim_start_matches("**").trim().to_string())
    })?;
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    if subject.is_empty() || body.is_empty() {
        return None;
    }
    Some((subject, body))
}
