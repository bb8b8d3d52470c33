//! Shared scripted collaborators for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use maildesk::config::PipelineConfig;
use maildesk::error::{LlmError, MailError, RetrievalError};
use maildesk::knowledge::{KnowledgeBase, KnowledgeSnippet, SearchFilters};
use maildesk::llm::{CompletionRequest, CompletionResponse, LlmProvider};
use maildesk::mail::{
    EmailDetail, EmailSummary, MailClient, MailCommand, MailPayload, MailQuery, MailResult,
};
use maildesk::pipeline::{Collaborators, Orchestrator};

/// LLM that replays canned replies in order.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new<'a>(replies: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self.replies.lock().unwrap().pop_front().ok_or_else(|| {
            LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "script exhausted".into(),
            }
        })?;
        Ok(CompletionResponse { content })
    }
}

/// Knowledge base returning a fixed result set.
pub struct StaticKnowledge {
    snippets: Option<Vec<KnowledgeSnippet>>,
    calls: AtomicUsize,
}

impl StaticKnowledge {
    pub fn with(snippets: Vec<KnowledgeSnippet>) -> Self {
        Self {
            snippets: Some(snippets),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            snippets: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledge {
    fn name(&self) -> &str {
        "static"
    }

    async fn search(
        &self,
        _query: &str,
        limit: usize,
        _filters: Option<&SearchFilters>,
    ) -> Result<Vec<KnowledgeSnippet>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.snippets {
            Some(snippets) => Ok(snippets.iter().take(limit).cloned().collect()),
            None => Err(RetrievalError::Unavailable {
                reason: "connection refused".into(),
            }),
        }
    }
}

/// Mail client over a fixed inbox (newest first) that records every command.
pub struct RecordingMail {
    inbox: Vec<EmailSummary>,
    commands: Mutex<Vec<MailCommand>>,
}

impl RecordingMail {
    pub fn with_inbox(inbox: Vec<EmailSummary>) -> Self {
        Self {
            inbox,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<MailCommand> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailClient for RecordingMail {
    fn name(&self) -> &str {
        "recording"
    }

    async fn execute(&self, command: MailCommand) -> Result<MailResult, MailError> {
        self.commands.lock().unwrap().push(command.clone());
        let payload = match command {
            MailCommand::List { query, max_results } => MailPayload::Messages {
                messages: self
                    .inbox
                    .iter()
                    .filter(|e| match &query {
                        MailQuery::Inbox | MailQuery::Unread => true,
                        MailQuery::From(s) => e.from.to_lowercase().contains(&s.to_lowercase()),
                        MailQuery::Subject(s) => {
                            e.subject.to_lowercase().contains(&s.to_lowercase())
                        }
                    })
                    .take(max_results)
                    .cloned()
                    .collect(),
            },
            MailCommand::Get { message_id } => {
                let email = self
                    .inbox
                    .iter()
                    .find(|e| e.id == message_id)
                    .ok_or(MailError::NotFound {
                        message_id: message_id.clone(),
                    })?;
                MailPayload::Message {
                    message: EmailDetail {
                        id: email.id.clone(),
                        from: email.from.clone(),
                        to: vec!["me@example.com".into()],
                        subject: email.subject.clone(),
                        date: None,
                        body: email.snippet.clone(),
                        labels: vec![],
                    },
                }
            }
            MailCommand::Send { .. } => MailPayload::Sent {
                message_id: "sent-1".into(),
            },
            MailCommand::Label { message_id, label } => MailPayload::Labeled { message_id, label },
            MailCommand::Archive { message_id } => MailPayload::Archived { message_id },
        };
        Ok(MailResult::ok(payload))
    }
}

pub fn summary(id: &str, from: &str, subject: &str) -> EmailSummary {
    EmailSummary {
        id: id.into(),
        from: from.into(),
        subject: subject.into(),
        date: None,
        snippet: String::new(),
    }
}

/// Orchestrator over the given scripted collaborators with default tuning.
pub fn orchestrator(
    llm: Arc<ScriptedLlm>,
    knowledge: Arc<StaticKnowledge>,
    mail: Arc<RecordingMail>,
) -> Orchestrator {
    Orchestrator::new(
        Collaborators {
            llm,
            knowledge,
            mail,
        },
        PipelineConfig::default(),
    )
}
