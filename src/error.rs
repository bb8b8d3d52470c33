//! Error types for maildesk.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Generation model errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Output violated the requested constraint: {reason}")]
    ConstraintViolation { reason: String },
}

impl LlmError {
    /// Whether the provider could not be reached or refused to serve the call.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. }
                | Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::AuthFailed { .. }
        )
    }
}

/// Knowledge-base retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Knowledge base unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid response from knowledge base: {reason}")]
    InvalidResponse { reason: String },

    #[error("Failed to load knowledge documents: {0}")]
    Load(String),
}

/// Mail provider errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail provider unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Permission denied by mail provider: {reason}")]
    PermissionDenied { reason: String },

    #[error("Message {message_id} not found")]
    NotFound { message_id: String },

    #[error("Invalid mail command: {reason}")]
    InvalidCommand { reason: String },
}

/// Unexpected faults raised while a handler runs.
///
/// Collaborator failures are answered by the handlers themselves; anything
/// that surfaces as a `HandlerError` is converted to a generic failure by the
/// orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler {handler} failed: {reason}")]
    Failed { handler: String, reason: String },

    #[error("Turn state error: {0}")]
    State(#[from] TurnError),
}

/// Per-turn state machine errors.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Turn {turn_id} cannot transition from {from} to {to}")]
    InvalidTransition {
        turn_id: Uuid,
        from: String,
        to: String,
    },

    #[error("Turn {turn_id} already has intent {intent}")]
    IntentAlreadyAssigned { turn_id: Uuid, intent: String },

    #[error("Turn {turn_id} has no {missing} yet")]
    Incomplete { turn_id: Uuid, missing: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_variants() {
        let timeout = LlmError::Timeout {
            provider: "openai".into(),
            after: Duration::from_secs(30),
        };
        assert!(timeout.is_unavailable());

        let violation = LlmError::ConstraintViolation {
            reason: "label outside set".into(),
        };
        assert!(!violation.is_unavailable());
    }

    #[test]
    fn turn_error_display_names_phases() {
        let err = TurnError::InvalidTransition {
            turn_id: Uuid::nil(),
            from: "handled".into(),
            to: "classified".into(),
        };
        let text = err.to_string();
        assert!(text.contains("handled"));
        assert!(text.contains("classified"));
    }
}
