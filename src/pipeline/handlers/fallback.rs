use async_trait::async_trait;

use super::IntentHandler;
use crate::error::HandlerError;
use crate::pipeline::router::HandlerKind;
use crate::pipeline::types::ConversationState;

pub const REPHRASE_RESPONSE: &str =
    "I'm not sure how to help with that. Could you rephrase your request?";

/// Handler for `unknown`: ask the user to rephrase. No side effects.
pub struct FallbackHandler;

#[async_trait]
impl IntentHandler for FallbackHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Fallback
    }

    async fn handle(&self, state: &mut ConversationState) -> Result<(), HandlerError> {
        state.respond(REPHRASE_RESPONSE);
        Ok(())
    }
}
