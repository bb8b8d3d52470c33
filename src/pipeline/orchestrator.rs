//! Turn orchestrator — the state machine.
//!
//! `received → classified → routed → handled → terminal`, one forward pass
//! per turn. Handler errors and panics are caught here and turned into a
//! generic failure response; `run_turn` always returns an outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::HandlerError;
use crate::pipeline::Collaborators;
use crate::pipeline::classifier::IntentClassifier;
use crate::pipeline::handlers::{HandlerSet, IntentHandler};
use crate::pipeline::router::route;
use crate::pipeline::types::{ConversationState, TurnOutcome, TurnRequest};

/// Response for any fault that escapes a handler.
pub const GENERIC_FAILURE_RESPONSE: &str =
    "Sorry, something went wrong while handling that request. Please try again.";

/// Runs turns. Shareable across tasks; holds no per-turn state.
pub struct Orchestrator {
    classifier: IntentClassifier,
    handlers: HandlerSet,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&collaborators.llm)),
            handlers: HandlerSet::new(&collaborators, &config),
        }
    }

    /// Replace the default handler for the handler's kind.
    pub fn with_handler(mut self, handler: Arc<dyn IntentHandler>) -> Self {
        self.handlers.replace(handler);
        self
    }

    /// Run one turn to its terminal state.
    pub async fn run_turn(&self, request: TurnRequest) -> TurnOutcome {
        let mut state = ConversationState::new(request.text, request.context);
        let turn_id = state.id();
        info!(turn_id = %turn_id, chars = state.input().chars().count(), "Turn received");

        if let Err(e) = self.drive(&mut state).await {
            error!(
                turn_id = %turn_id,
                phase = %state.phase(),
                intent = ?state.intent(),
                error = %e,
                "Turn failed, returning generic response"
            );
            state.abort(GENERIC_FAILURE_RESPONSE);
        }

        let outcome = state.into_outcome();
        info!(
            turn_id = %turn_id,
            intent = %outcome.intent,
            handler = %outcome.handler,
            error = outcome.error,
            "Turn complete"
        );
        outcome
    }

    async fn drive(&self, state: &mut ConversationState) -> Result<(), HandlerError> {
        let intent = self.classifier.classify(state.input(), state.context()).await;
        state.assign_intent(intent)?;

        let kind = route(intent);
        state.assign_handler(kind)?;
        info!(turn_id = %state.id(), intent = %intent, handler = %kind, "Turn routed");

        let handler = self.handlers.get(kind);
        match AssertUnwindSafe(handler.handle(state)).catch_unwind().await {
            Ok(result) => result?,
            Err(panic) => {
                return Err(HandlerError::Failed {
                    handler: kind.to_string(),
                    reason: format!("panicked: {}", panic_message(panic.as_ref())),
                });
            }
        }

        state.mark_handled()?;
        state.terminate()?;
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
