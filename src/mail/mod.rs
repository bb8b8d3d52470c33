//! Mail client: one structured command in, one structured result out.
//!
//! The pipeline shapes `MailCommand`s and interprets `MailResult`s; transport
//! lives behind the `MailClient` trait (`ImapMailClient` for real mailboxes).

pub mod imap;
pub mod message;

pub use imap::{ImapMailClient, MailConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MailError;

/// Which messages a `List` command selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MailQuery {
    Inbox,
    Unread,
    From(String),
    Subject(String),
}

/// A single mail-provider operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum MailCommand {
    /// Newest-first listing of at most `max_results` messages.
    List { query: MailQuery, max_results: usize },
    Get { message_id: String },
    Send {
        to: String,
        subject: String,
        body: String,
    },
    Label { message_id: String, label: String },
    Archive { message_id: String },
}

impl MailCommand {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Get { .. } => "get",
            Self::Send { .. } => "send",
            Self::Label { .. } => "label",
            Self::Archive { .. } => "archive",
        }
    }

    /// Whether the command changes mailbox state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Send { .. } | Self::Label { .. } | Self::Archive { .. }
        )
    }
}

/// Header-level view of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSummary {
    /// Provider id used in follow-up commands.
    pub id: String,
    pub from: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snippet: String,
}

/// Full message, body already reduced to readable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDetail {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// Payload of a mail result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MailPayload {
    None,
    Messages { messages: Vec<EmailSummary> },
    Message { message: EmailDetail },
    Sent { message_id: String },
    Labeled { message_id: String, label: String },
    Archived { message_id: String },
}

/// Structured, provider-agnostic response to a `MailCommand`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailResult {
    pub success: bool,
    pub payload: MailPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl MailResult {
    pub fn ok(payload: MailPayload) -> Self {
        Self {
            success: true,
            payload,
            detail: None,
        }
    }

    /// The provider answered but refused or could not apply the operation.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: MailPayload::None,
            detail: Some(detail.into()),
        }
    }

    /// Listed messages, if this result carries any.
    pub fn messages(&self) -> &[EmailSummary] {
        match &self.payload {
            MailPayload::Messages { messages } => messages,
            _ => &[],
        }
    }
}

/// Mail provider client.
///
/// Transport failures and timeouts surface as `MailError::Unavailable`;
/// rejected credentials as `MailError::PermissionDenied`.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Backend name, for health reporting.
    fn name(&self) -> &str;

    async fn execute(&self, command: MailCommand) -> Result<MailResult, MailError>;
}

/// Stand-in used when no mailbox is configured: every command is unavailable.
pub struct DisabledMailClient;

#[async_trait]
impl MailClient for DisabledMailClient {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn execute(&self, command: MailCommand) -> Result<MailResult, MailError> {
        tracing::debug!(operation = command.label(), "Mail command on disabled client");
        Err(MailError::Unavailable {
            reason: "no mailbox configured".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_labels_and_mutation() {
        let list = MailCommand::List {
            query: MailQuery::Unread,
            max_results: 5,
        };
        assert_eq!(list.label(), "list");
        assert!(!list.is_mutating());

        let archive = MailCommand::Archive {
            message_id: "42".into(),
        };
        assert_eq!(archive.label(), "archive");
        assert!(archive.is_mutating());
    }

    #[test]
    fn command_serializes_with_operation_tag() {
        let cmd = MailCommand::Label {
            message_id: "42".into(),
            label: "Important".into(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["operation"], "label");
        assert_eq!(json["label"], "Important");
    }

    #[test]
    fn result_messages_accessor() {
        let result = MailResult::ok(MailPayload::Messages {
            messages: vec![EmailSummary {
                id: "1".into(),
                from: "alice@example.com".into(),
                subject: "Hi".into(),
                date: None,
                snippet: String::new(),
            }],
        });
        assert_eq!(result.messages().len(), 1);
        assert!(MailResult::failed("nope").messages().is_empty());
    }

    #[tokio::test]
    async fn disabled_client_is_unavailable() {
        let result = DisabledMailClient
            .execute(MailCommand::Get {
                message_id: "1".into(),
            })
            .await;
        assert!(matches!(result, Err(MailError::Unavailable { .. })));
    }
}
