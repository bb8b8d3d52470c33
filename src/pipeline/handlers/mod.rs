//! Intent handlers.
//!
//! Each handler reads the turn input, calls at most the collaborators it
//! needs (sequentially), and leaves a response plus error flag on the state.
//! Collaborator failures are answered here with degraded responses; an `Err`
//! means something unexpected happened and the orchestrator takes over.

mod draft;
mod fallback;
mod inbox;
mod read;
mod retrieve;

pub use draft::{DraftEmailHandler, UNVERIFIED_DRAFT_NOTICE, parse_draft, send_draft};
pub use fallback::{FallbackHandler, REPHRASE_RESPONSE};
pub use inbox::ManageInboxHandler;
pub use read::{ReadEmailHandler, ReadRequest};
pub use retrieve::{NOT_FOUND_RESPONSE, RetrieveInfoHandler, SEARCH_UNAVAILABLE_RESPONSE};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::error::{HandlerError, MailError};
use crate::pipeline::Collaborators;
use crate::pipeline::router::HandlerKind;
use crate::pipeline::types::ConversationState;

/// Behavior for one `HandlerKind`.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Populate the state's response and error flag.
    async fn handle(&self, state: &mut ConversationState) -> Result<(), HandlerError>;
}

/// One handler per `HandlerKind`.
pub struct HandlerSet {
    draft_email: Arc<dyn IntentHandler>,
    retrieve_info: Arc<dyn IntentHandler>,
    manage_inbox: Arc<dyn IntentHandler>,
    read_email: Arc<dyn IntentHandler>,
    fallback: Arc<dyn IntentHandler>,
}

impl HandlerSet {
    /// Default handlers over the given collaborators.
    pub fn new(collaborators: &Collaborators, config: &PipelineConfig) -> Self {
        Self {
            draft_email: Arc::new(DraftEmailHandler::new(
                Arc::clone(&collaborators.knowledge),
                Arc::clone(&collaborators.llm),
                config,
            )),
            retrieve_info: Arc::new(RetrieveInfoHandler::new(
                Arc::clone(&collaborators.knowledge),
                Arc::clone(&collaborators.llm),
                config,
            )),
            manage_inbox: Arc::new(ManageInboxHandler::new(
                Arc::clone(&collaborators.mail),
                config,
            )),
            read_email: Arc::new(ReadEmailHandler::new(
                Arc::clone(&collaborators.mail),
                config,
            )),
            fallback: Arc::new(FallbackHandler),
        }
    }

    pub fn get(&self, kind: HandlerKind) -> Arc<dyn IntentHandler> {
        let handler = match kind {
            HandlerKind::DraftEmail => &self.draft_email,
            HandlerKind::RetrieveInfo => &self.retrieve_info,
            HandlerKind::ManageInbox => &self.manage_inbox,
            HandlerKind::ReadEmail => &self.read_email,
            HandlerKind::Fallback => &self.fallback,
        };
        Arc::clone(handler)
    }

    /// Swap in a different handler for its own kind.
    pub fn replace(&mut self, handler: Arc<dyn IntentHandler>) {
        let slot = match handler.kind() {
            HandlerKind::DraftEmail => &mut self.draft_email,
            HandlerKind::RetrieveInfo => &mut self.retrieve_info,
            HandlerKind::ManageInbox => &mut self.manage_inbox,
            HandlerKind::ReadEmail => &mut self.read_email,
            HandlerKind::Fallback => &mut self.fallback,
        };
        *slot = handler;
    }
}

/// User-facing text for a failed mail call.
pub(crate) fn mail_failure_response(error: &MailError) -> String {
    match error {
        MailError::PermissionDenied { .. } => {
            "I don't have permission to access your mailbox. Please check the mail account settings."
                .into()
        }
        MailError::NotFound { message_id } => {
            format!("I couldn't find message {message_id} in your mailbox.")
        }
        MailError::InvalidCommand { reason } => {
            format!("Your mail provider couldn't process that request: {reason}")
        }
        MailError::Unavailable { .. } => {
            "I couldn't reach your mailbox right now. Please try again in a moment.".into()
        }
    }
}
