//! CLI — stdin/stdout REPL over the orchestrator for local testing.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::mail::MailClient;
use crate::pipeline::handlers::send_draft;
use crate::pipeline::types::MAX_CONTEXT_ENTRIES;
use crate::pipeline::{EmailDraft, Orchestrator, TurnRequest};

/// Local REPL session.
///
/// Keeps the last few exchanged lines as turn context and remembers the most
/// recent draft so `/send` can deliver it.
pub struct Repl {
    orchestrator: Arc<Orchestrator>,
    mail: Arc<dyn MailClient>,
    context: Vec<String>,
    last_draft: Option<EmailDraft>,
}

impl Repl {
    pub fn new(orchestrator: Arc<Orchestrator>, mail: Arc<dyn MailClient>) -> Self {
        Self {
            orchestrator,
            mail,
            context: Vec::new(),
            last_draft: None,
        }
    }

    /// Read lines until EOF or `/quit`, writing one response per line.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        eprint!("> ");

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                eprint!("> ");
                continue;
            }
            if line == "/quit" || line == "/exit" {
                break;
            }

            let reply = if let Some(rest) = line.strip_prefix("/send") {
                self.send_last_draft(rest.trim()).await
            } else {
                self.turn(line).await
            };

            writer.write_all(format!("\n{reply}\n\n").as_bytes()).await?;
            writer.flush().await?;
            eprint!("> ");
        }
        Ok(())
    }

    async fn turn(&mut self, line: &str) -> String {
        let request = TurnRequest::new(line).with_context(self.context.clone());
        let outcome = self.orchestrator.run_turn(request).await;

        self.remember(format!("user: {line}"));
        self.remember(format!("assistant: {}", outcome.response));
        if outcome.draft.is_some() {
            self.last_draft = outcome.draft;
        }
        outcome.response
    }

    async fn send_last_draft(&mut self, recipient: &str) -> String {
        let Some(mut draft) = self.last_draft.clone() else {
            return "There is no draft to send yet.".to_string();
        };
        if !recipient.is_empty() {
            draft.to = Some(recipient.to_string());
        }
        match send_draft(self.mail.as_ref(), &draft).await {
            Ok(result) if result.success => {
                self.last_draft = None;
                format!("Sent \"{}\".", draft.subject)
            }
            Ok(result) => format!(
                "Sending failed: {}",
                result.detail.unwrap_or_else(|| "unknown error".into())
            ),
            Err(e) => format!("Sending failed: {e}"),
        }
    }

    fn remember(&mut self, entry: String) {
        self.context.push(entry);
        if self.context.len() > MAX_CONTEXT_ENTRIES {
            let excess = self.context.len() - MAX_CONTEXT_ENTRIES;
            self.context.drain(..excess);
        }
    }
}
