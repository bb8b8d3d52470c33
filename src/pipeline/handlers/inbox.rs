//! manage_inbox: label / archive with an explicitly identified target.
//!
//! Flow:
//! 1. Parse the instruction (no model call); ambiguity → clarification, no mail calls
//! 2. Resolve the target to one message id (bounded `List` when needed)
//! 3. One `Label` / `Archive` command per action, in order

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{IntentHandler, mail_failure_response};
use crate::config::PipelineConfig;
use crate::error::HandlerError;
use crate::mail::message::truncate_chars;
use crate::mail::{EmailSummary, MailClient, MailCommand, MailQuery};
use crate::pipeline::router::HandlerKind;
use crate::pipeline::rules::{InboxAction, InboxInstruction, InstructionParser, MessageTarget};
use crate::pipeline::types::ConversationState;

/// Longest subject quoted back to the user.
const SUBJECT_PREVIEW_CHARS: usize = 60;

pub struct ManageInboxHandler {
    mail: Arc<dyn MailClient>,
    parser: InstructionParser,
    search_limit: usize,
}

/// A target resolved to a single message.
struct ResolvedTarget {
    message_id: String,
    description: String,
}

impl ManageInboxHandler {
    pub fn new(mail: Arc<dyn MailClient>, config: &PipelineConfig) -> Self {
        Self {
            mail,
            parser: InstructionParser::new(),
            search_limit: config.inbox_search_limit,
        }
    }

    /// Resolve the target. `Err` carries the user-facing response.
    async fn resolve(
        &self,
        instruction: &InboxInstruction,
        state: &mut ConversationState,
    ) -> Result<ResolvedTarget, String> {
        let (query, newest, what) = match &instruction.target {
            MessageTarget::MessageId(id) => {
                return Ok(ResolvedTarget {
                    message_id: id.clone(),
                    description: format!("message {id}"),
                });
            }
            MessageTarget::MostRecent => (MailQuery::Inbox, true, "in your inbox".to_string()),
            MessageTarget::FromSender { sender, newest } => {
                (MailQuery::From(sender.clone()), *newest, format!("from {sender}"))
            }
            MessageTarget::AboutSubject { subject, newest } => (
                MailQuery::Subject(subject.clone()),
                *newest,
                format!("about \"{subject}\""),
            ),
        };

        let max_results = if newest { 1 } else { self.search_limit };
        let result = self
            .mail
            .execute(MailCommand::List { query, max_results })
            .await
            .map_err(|e| {
                warn!(turn_id = %state.id(), error = %e, "Inbox target lookup failed");
                mail_failure_response(&e)
            })?;
        let messages: Vec<EmailSummary> = result.messages().to_vec();
        let detail = result.detail.clone();
        let success = result.success;
        state.mail_results.push(result);

        if !success {
            return Err(format!(
                "I couldn't search your mailbox: {}",
                detail.unwrap_or_else(|| "unknown error".into())
            ));
        }

        let archiving = instruction.actions.contains(&InboxAction::Archive);
        match messages.as_slice() {
            [] => Err(format!("I couldn't find an email {what}.")),
            [first, rest @ ..] if !rest.is_empty() && archiving => {
                let listed: Vec<String> = std::iter::once(first)
                    .chain(rest.iter())
                    .take(5)
                    .map(|m| format!("- {} (id {})", quoted_subject(m), m.id))
                    .collect();
                Err(format!(
                    "I found {} emails {what}. Which one should I archive?\n{}",
                    messages.len(),
                    listed.join("\n")
                ))
            }
            [first, ..] => Ok(ResolvedTarget {
                message_id: first.id.clone(),
                description: format!("the email from {} ({})", first.from, quoted_subject(first)),
            }),
        }
    }
}

fn quoted_subject(message: &EmailSummary) -> String {
    format!("\"{}\"", truncate_chars(&message.subject, SUBJECT_PREVIEW_CHARS))
}

#[async_trait]
impl IntentHandler for ManageInboxHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::ManageInbox
    }

    async fn handle(&self, state: &mut ConversationState) -> Result<(), HandlerError> {
        let turn_id = state.id();
        let instruction = match self.parser.parse(state.input()) {
            Ok(instruction) => instruction,
            Err(ambiguity) => {
                info!(turn_id = %turn_id, ambiguity = ?ambiguity, "Inbox instruction needs clarification");
                state.fail(ambiguity.clarification());
                return Ok(());
            }
        };

        let target = match self.resolve(&instruction, state).await {
            Ok(target) => target,
            Err(response) => {
                state.fail(response);
                return Ok(());
            }
        };

        let mut done: Vec<String> = Vec::with_capacity(instruction.actions.len());
        for action in &instruction.actions {
            let subject = if done.is_empty() {
                target.description.as_str()
            } else {
                "it"
            };
            let (command, summary) = match action {
                InboxAction::Label { name } => (
                    MailCommand::Label {
                        message_id: target.message_id.clone(),
                        label: name.clone(),
                    },
                    format!("labeled {subject} as \"{name}\""),
                ),
                InboxAction::Archive => (
                    MailCommand::Archive {
                        message_id: target.message_id.clone(),
                    },
                    format!("archived {subject}"),
                ),
            };

            info!(turn_id = %turn_id, operation = command.label(), message_id = %target.message_id, "Executing inbox command");
            match self.mail.execute(command).await {
                Ok(result) if result.success => state.mail_results.push(result),
                Ok(result) => {
                    let detail = result.detail.clone().unwrap_or_else(|| "unknown error".into());
                    state.mail_results.push(result);
                    state.fail(partial_response(&done, action, &detail));
                    return Ok(());
                }
                Err(e) => {
                    warn!(turn_id = %turn_id, operation = action.label(), error = %e, "Inbox command failed");
                    state.fail(partial_response(&done, action, &mail_failure_response(&e)));
                    return Ok(());
                }
            }
            done.push(summary);
        }

        state.respond(format!("Done. I {}.", done.join(" and ")));
        Ok(())
    }
}

fn partial_response(done: &[String], failed: &InboxAction, detail: &str) -> String {
    let failed = match failed {
        InboxAction::Label { name } => format!("label the email as \"{name}\""),
        InboxAction::Archive => "archive the email".to_string(),
    };
    if done.is_empty() {
        format!("I couldn't {failed}. {detail}")
    } else {
        format!("I {}, but I couldn't {failed}. {detail}", done.join(" and "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::handlers::test_support::{RecordingMail, summary};

    fn inbox() -> Vec<EmailSummary> {
        vec![
            summary("103", "alice@example.com", "Quarterly numbers"),
            summary("102", "bob@example.com", "Lunch?"),
            summary("101", "alice@example.com", "Offsite agenda"),
        ]
    }

    fn handler(mail: Arc<RecordingMail>) -> ManageInboxHandler {
        ManageInboxHandler::new(mail, &PipelineConfig::default())
    }

    #[tokio::test]
    async fn label_and_archive_latest() {
        let mail = Arc::new(RecordingMail::with_inbox(inbox()));
        let mut state =
            ConversationState::new("Label the last email as important and archive it", vec![]);
        handler(mail.clone()).handle(&mut state).await.unwrap();

        assert_eq!(
            mail.commands(),
            vec![
                MailCommand::List {
                    query: MailQuery::Inbox,
                    max_results: 1
                },
                MailCommand::Label {
                    message_id: "103".into(),
                    label: "important".into()
                },
                MailCommand::Archive {
                    message_id: "103".into()
                },
            ]
        );
        assert_eq!(
            state.response(),
            Some(
                "Done. I labeled the email from alice@example.com (\"Quarterly numbers\") as \"important\" and archived it."
            )
        );
        assert!(!state.is_error());
        assert_eq!(state.mail_results.len(), 3);
    }

    #[tokio::test]
    async fn missing_target_makes_no_mail_calls() {
        let mail = Arc::new(RecordingMail::with_inbox(inbox()));
        for text in ["archive the email", "archive it", "delete the latest email"] {
            let mut state = ConversationState::new(text, vec![]);
            handler(mail.clone()).handle(&mut state).await.unwrap();
            assert!(state.is_error(), "{text}");
        }
        assert!(mail.commands().is_empty());
    }

    #[tokio::test]
    async fn unresolved_sender_never_archives_the_newest_email() {
        let mail = Arc::new(RecordingMail::with_inbox(vec![
            summary("103", "carol@example.com", "Payroll"),
            summary("102", "bob@example.com", "Lunch?"),
        ]));
        for text in [
            "Archive the last email I got from Bob",
            "Archive Bob's latest email",
        ] {
            let mut state = ConversationState::new(text, vec![]);
            handler(mail.clone()).handle(&mut state).await.unwrap();
            assert!(state.is_error(), "{text}");
            assert!(state.response().unwrap().contains("Which email"), "{text}");
        }
        assert!(mail.commands().is_empty());
    }

    #[tokio::test]
    async fn label_from_address_applies_named_label() {
        let mail = Arc::new(RecordingMail::with_inbox(inbox()));
        let mut state = ConversationState::new(
            "Mark the latest email from bob@example.com as Follow-up",
            vec![],
        );
        handler(mail.clone()).handle(&mut state).await.unwrap();

        assert!(!state.is_error());
        assert_eq!(
            mail.commands().last(),
            Some(&MailCommand::Label {
                message_id: "102".into(),
                label: "Follow-up".into()
            })
        );
    }

    #[tokio::test]
    async fn several_matches_for_archive_is_ambiguous() {
        let mail = Arc::new(RecordingMail::with_inbox(inbox()));
        let mut state = ConversationState::new("archive the email from alice", vec![]);
        handler(mail.clone()).handle(&mut state).await.unwrap();

        assert!(state.is_error());
        assert!(state.response().unwrap().contains("I found 2 emails from alice"));
        assert!(mail.commands().iter().all(|c| !c.is_mutating()));
    }

    #[tokio::test]
    async fn latest_from_sender_is_unambiguous() {
        let mail = Arc::new(RecordingMail::with_inbox(inbox()));
        let mut state = ConversationState::new("archive the latest email from alice", vec![]);
        handler(mail.clone()).handle(&mut state).await.unwrap();

        assert!(!state.is_error());
        assert_eq!(
            mail.commands().last(),
            Some(&MailCommand::Archive {
                message_id: "103".into()
            })
        );
    }

    #[tokio::test]
    async fn no_match_is_reported() {
        let mail = Arc::new(RecordingMail::with_inbox(inbox()));
        let mut state = ConversationState::new("archive the email from carol", vec![]);
        handler(mail.clone()).handle(&mut state).await.unwrap();
        assert_eq!(
            state.response(),
            Some("I couldn't find an email from carol.")
        );
        assert!(state.is_error());
    }

    #[tokio::test]
    async fn explicit_id_skips_lookup() {
        let mail = Arc::new(RecordingMail::with_inbox(inbox()));
        let mut state = ConversationState::new("archive message 101", vec![]);
        handler(mail.clone()).handle(&mut state).await.unwrap();
        assert_eq!(
            mail.commands(),
            vec![MailCommand::Archive {
                message_id: "101".into()
            }]
        );
        assert_eq!(state.response(), Some("Done. I archived message 101."));
    }

    #[tokio::test]
    async fn mail_failure_is_degraded() {
        let mail = Arc::new(RecordingMail::unavailable());
        let mut state = ConversationState::new("archive message 101", vec![]);
        handler(mail).handle(&mut state).await.unwrap();
        assert!(state.is_error());
        assert!(state.response().unwrap().starts_with("I couldn't archive the email."));
    }

    #[test]
    fn partial_response_mentions_completed_steps() {
        let text = partial_response(
            &["labeled message 7 as \"x\"".to_string()],
            &InboxAction::Archive,
            "Mailbox is read-only.",
        );
        assert_eq!(
            text,
            "I labeled message 7 as \"x\", but I couldn't archive the email. Mailbox is read-only."
        );
    }
}
