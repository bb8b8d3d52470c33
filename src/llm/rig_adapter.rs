//! Bridges rig-core's `CompletionModel` to our `LlmProvider` trait.

use std::time::Duration;

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{AssistantContent, CompletionModel, Message as RigMessage};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

/// Default per-call timeout.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter that exposes any rig completion model as an `LlmProvider`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: String,
    timeout: Duration,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    pub fn new(model: M, model_name: &str, provider: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: provider.to_string(),
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_failed(&self, reason: impl Into<String>) -> LlmError {
        LlmError::RequestFailed {
            provider: self.provider.clone(),
            reason: reason.into(),
        }
    }
}

/// Split chat messages into (history, prompt). The last user message is the
/// prompt; earlier user/assistant turns become history.
fn split_prompt(messages: &[ChatMessage]) -> Option<(Vec<RigMessage>, String)> {
    let conversation: Vec<&ChatMessage> =
        messages.iter().filter(|m| m.role != Role::System).collect();
    let (last, earlier) = conversation.split_last()?;
    if last.role != Role::User {
        return None;
    }
    let history = earlier
        .iter()
        .map(|m| match m.role {
            Role::Assistant => RigMessage::assistant(m.content.clone()),
            _ => RigMessage::user(m.content.clone()),
        })
        .collect();
    Some((history, last.content.clone()))
}

fn collect_text(choice: &OneOrMany<AssistantContent>) -> String {
    let mut text = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(t) = content {
            text.push_str(&t.text);
        }
    }
    text
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (history, prompt) = split_prompt(&request.messages)
            .ok_or_else(|| self.request_failed("request must end with a user message"))?;

        let mut builder = self
            .model
            .completion_request(RigMessage::user(prompt))
            .messages(history);
        if let Some(preamble) = request.system_prompt() {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| LlmError::Timeout {
                provider: self.provider.clone(),
                after: self.timeout,
            })?
            .map_err(|e| {
                let reason = e.to_string();
                if reason.contains("401") || reason.to_lowercase().contains("unauthorized") {
                    LlmError::AuthFailed {
                        provider: self.provider.clone(),
                    }
                } else if reason.contains("429") {
                    LlmError::RateLimited {
                        provider: self.provider.clone(),
                        retry_after: None,
                    }
                } else {
                    self.request_failed(reason)
                }
            })?;

        let content = collect_text(&response.choice);
        tracing::debug!(
            model = %self.model_name,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion finished"
        );

        Ok(CompletionResponse { content })
    }
}
