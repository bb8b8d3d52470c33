//! read_email: condensed inbox summaries, never raw bodies.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use super::{IntentHandler, mail_failure_response};
use crate::config::PipelineConfig;
use crate::error::HandlerError;
use crate::mail::message::{strip_quoted_text, truncate_chars};
use crate::mail::{EmailSummary, MailClient, MailCommand, MailPayload, MailQuery};
use crate::pipeline::router::HandlerKind;
use crate::pipeline::types::ConversationState;

/// Longest subject in a listing line.
const SUBJECT_MAX_CHARS: usize = 120;

/// Longest body preview when reading a single email.
const BODY_PREVIEW_CHARS: usize = 400;

const NUMBER_WORDS: &[(&str, usize)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("fifteen", 15),
    ("twenty", 20),
];

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d+|one|two|three|four|five|six|seven|eight|nine|ten|fifteen|twenty)\s+(?:\w+\s+){0,2}?(?:emails|messages|mails)\b",
    )
    .expect("count regex")
});

static SENDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfrom\s+(?:the\s+)?([\w.+\-]+@[\w\-]+(?:\.[\w\-]+)+|[a-z][\w.\-]*)")
        .expect("sender regex")
});

static SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:about|regarding|titled)\s+["']?([^"'.!?]+?)["']?\s*(?:$|[.!?,])"#)
        .expect("subject regex")
});

static ALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:inbox|all\s+(?:my\s+)?(?:emails|messages))\b").expect("inbox regex")
});

static SINGLE_LATEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:latest|last|newest|most\s+recent)\s+(?:email|message)\b")
        .expect("latest regex")
});

/// What the user asked to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub query: MailQuery,
    pub count: usize,
    /// Read the newest matching email itself (body preview) instead of a list.
    pub open_latest: bool,
}

impl ReadRequest {
    /// Parse a read request. `count` is clamped to `1..=cap`.
    pub fn parse(text: &str, default_count: usize, cap: usize) -> Self {
        let count = COUNT_RE
            .captures(text)
            .and_then(|caps| {
                let raw = caps[1].to_lowercase();
                raw.parse::<usize>().ok().or_else(|| {
                    NUMBER_WORDS
                        .iter()
                        .find(|(word, _)| *word == raw)
                        .map(|(_, n)| *n)
                })
            })
            .unwrap_or(default_count)
            .clamp(1, cap.max(1));

        let query = if let Some(caps) = SENDER_RE.captures(text) {
            MailQuery::From(caps[1].trim_end_matches('.').to_string())
        } else if let Some(caps) = SUBJECT_RE.captures(text) {
            MailQuery::Subject(caps[1].trim().to_string())
        } else if ALL_RE.is_match(text) {
            MailQuery::Inbox
        } else {
            MailQuery::Unread
        };

        let open_latest = SINGLE_LATEST_RE.is_match(text) && !COUNT_RE.is_match(text);

        Self {
            query,
            count,
            open_latest,
        }
    }
}

pub struct ReadEmailHandler {
    mail: Arc<dyn MailClient>,
    default_count: usize,
    cap: usize,
}

impl ReadEmailHandler {
    pub fn new(mail: Arc<dyn MailClient>, config: &PipelineConfig) -> Self {
        Self {
            mail,
            default_count: config.read_default_count,
            cap: config.read_cap,
        }
    }

    async fn list(
        &self,
        state: &mut ConversationState,
        request: &ReadRequest,
    ) -> Result<Vec<EmailSummary>, String> {
        let max_results = if request.open_latest { 1 } else { request.count };
        let result = self
            .mail
            .execute(MailCommand::List {
                query: request.query.clone(),
                max_results,
            })
            .await
            .map_err(|e| {
                warn!(turn_id = %state.id(), error = %e, "Inbox listing failed");
                mail_failure_response(&e)
            })?;
        if !result.success {
            let detail = result.detail.clone().unwrap_or_else(|| "unknown error".into());
            state.mail_results.push(result);
            return Err(format!("I couldn't list your emails: {detail}"));
        }
        // Never trust the provider to honor the bound.
        let messages: Vec<EmailSummary> = result.messages().iter().take(max_results).cloned().collect();
        state.mail_results.push(result);
        Ok(messages)
    }

    async fn open(
        &self,
        state: &mut ConversationState,
        latest: &EmailSummary,
    ) -> Result<String, String> {
        let result = self
            .mail
            .execute(MailCommand::Get {
                message_id: latest.id.clone(),
            })
            .await
            .map_err(|e| {
                warn!(turn_id = %state.id(), error = %e, "Fetching email failed");
                mail_failure_response(&e)
            })?;

        let response = match &result.payload {
            MailPayload::Message { message } if result.success => {
                let preview = truncate_chars(strip_quoted_text(&message.body).trim(), BODY_PREVIEW_CHARS);
                let mut text = format!(
                    "Your latest email is from {}, subject \"{}\".",
                    message.from,
                    truncate_chars(&message.subject, SUBJECT_MAX_CHARS)
                );
                if !preview.is_empty() {
                    text.push_str(&format!("\n\n{preview}"));
                }
                Ok(text)
            }
            _ => Err(format!(
                "I couldn't open that email: {}",
                result.detail.as_deref().unwrap_or("unexpected response")
            )),
        };
        state.mail_results.push(result);
        response
    }
}

#[async_trait]
impl IntentHandler for ReadEmailHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::ReadEmail
    }

    async fn handle(&self, state: &mut ConversationState) -> Result<(), HandlerError> {
        let request = ReadRequest::parse(state.input(), self.default_count, self.cap);
        debug!(turn_id = %state.id(), ?request, "Read request");

        let messages = match self.list(state, &request).await {
            Ok(messages) => messages,
            Err(response) => {
                state.fail(response);
                return Ok(());
            }
        };

        if messages.is_empty() {
            state.respond(empty_response(&request.query));
            return Ok(());
        }

        if request.open_latest {
            match self.open(state, &messages[0]).await {
                Ok(text) => state.respond(text),
                Err(text) => state.fail(text),
            }
            return Ok(());
        }

        state.respond(summarize(&request.query, &messages));
        Ok(())
    }
}

fn empty_response(query: &MailQuery) -> String {
    match query {
        MailQuery::Unread => "You have no unread emails.".into(),
        MailQuery::Inbox => "Your inbox is empty.".into(),
        MailQuery::From(sender) => format!("I couldn't find any emails from {sender}."),
        MailQuery::Subject(subject) => format!("I couldn't find any emails about \"{subject}\"."),
    }
}

/// Numbered `From …: subject` lines.
fn summarize(query: &MailQuery, messages: &[EmailSummary]) -> String {
    let heading = match query {
        MailQuery::Unread => "Here are your recent unread emails:".to_string(),
        MailQuery::Inbox => "Here are your most recent emails:".to_string(),
        MailQuery::From(sender) => format!("Here are your recent emails from {sender}:"),
        MailQuery::Subject(subject) => format!("Here are your recent emails about \"{subject}\":"),
    };
    let lines: Vec<String> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let subject = if m.subject.trim().is_empty() {
                "(no subject)".to_string()
            } else {
                truncate_chars(m.subject.trim(), SUBJECT_MAX_CHARS)
            };
            format!("{}. From {}: {subject}", i + 1, m.from)
        })
        .collect();
    format!("{heading}\n\n{}", lines.join("\n"))
}
