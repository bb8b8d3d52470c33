//! Turn pipeline.
//!
//! Every utterance flows through:
//! 1. `IntentClassifier::classify()` — one constrained model call
//! 2. `router::route()` — pure intent → handler mapping
//! 3. `IntentHandler::handle()` — retrieval / mail / composition
//! 4. `Orchestrator` — sequences the above and catches handler faults
//!
//! **No implicit send path exists.** Drafts are returned to the caller and
//! only `handlers::send_draft` issues `MailCommand::Send`.

pub mod classifier;
pub mod grounding;
pub mod handlers;
pub mod orchestrator;
pub mod router;
pub mod rules;
pub mod types;

pub use orchestrator::Orchestrator;
pub use router::{HandlerKind, route};
pub use types::{ConversationState, EmailDraft, Intent, TurnOutcome, TurnPhase, TurnRequest};

use std::sync::Arc;

use crate::knowledge::KnowledgeBase;
use crate::llm::LlmProvider;
use crate::mail::MailClient;

/// External services a turn may call.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmProvider>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub mail: Arc<dyn MailClient>,
}
