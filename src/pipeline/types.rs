//! Per-turn data model: intents, phases, and the conversation state threaded
//! through the state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TurnError;
use crate::knowledge::KnowledgeSnippet;
use crate::mail::MailResult;
use crate::pipeline::router::HandlerKind;

/// Most recent context entries kept per turn.
pub const MAX_CONTEXT_ENTRIES: usize = 5;

// ── Intent ──────────────────────────────────────────────────────────

/// Classified category of a user request. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    DraftEmail,
    RetrieveInfo,
    ManageInbox,
    ReadEmail,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 5] = [
        Intent::DraftEmail,
        Intent::RetrieveInfo,
        Intent::ManageInbox,
        Intent::ReadEmail,
        Intent::Unknown,
    ];

    /// Wire label (matches the serde representation).
    pub fn label(&self) -> &'static str {
        match self {
            Self::DraftEmail => "draft_email",
            Self::RetrieveInfo => "retrieve_info",
            Self::ManageInbox => "manage_inbox",
            Self::ReadEmail => "read_email",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Phase ───────────────────────────────────────────────────────────

/// Position of a turn in the state machine. Traversed strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Received,
    Classified,
    Routed,
    Handled,
    Terminal,
}

impl TurnPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Classified => "classified",
            Self::Routed => "routed",
            Self::Handled => "handled",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Draft ───────────────────────────────────────────────────────────

/// A composed email. Never sent by the pipeline itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
    /// Knowledge sources consulted while drafting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

// ── Request / outcome ───────────────────────────────────────────────

/// Input for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    pub text: String,
    /// Recent conversation lines, oldest first. Supplied by the caller.
    #[serde(default)]
    pub context: Vec<String>,
}

impl TurnRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }
}

/// Terminal record of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    pub intent: Intent,
    pub handler: HandlerKind,
    pub response: String,
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<EmailDraft>,
    pub completed_at: DateTime<Utc>,
}

// ── Conversation state ──────────────────────────────────────────────

/// Unit of work for one turn.
///
/// Owned by the turn, passed by `&mut` through each step, consumed into a
/// `TurnOutcome` at the end. Intent, handler, and phase are only reachable
/// through checked transitions.
#[derive(Debug)]
pub struct ConversationState {
    id: Uuid,
    input: String,
    context: Vec<String>,
    intent: Option<Intent>,
    handler: Option<HandlerKind>,
    phase: TurnPhase,
    /// Snippets the handler relied on, best first.
    pub retrieval: Vec<KnowledgeSnippet>,
    /// Mail results in the order the commands were issued.
    pub mail_results: Vec<MailResult>,
    pub draft: Option<EmailDraft>,
    response: Option<String>,
    error: bool,
}

impl ConversationState {
    pub fn new(input: impl Into<String>, mut context: Vec<String>) -> Self {
        if context.len() > MAX_CONTEXT_ENTRIES {
            context.drain(..context.len() - MAX_CONTEXT_ENTRIES);
        }
        Self {
            id: Uuid::new_v4(),
            input: input.into(),
            context,
            intent: None,
            handler: None,
            phase: TurnPhase::Received,
            retrieval: Vec::new(),
            mail_results: Vec::new(),
            draft: None,
            response: None,
            error: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn intent(&self) -> Option<Intent> {
        self.intent
    }

    pub fn handler(&self) -> Option<HandlerKind> {
        self.handler
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    fn transition(&mut self, from: TurnPhase, to: TurnPhase) -> Result<(), TurnError> {
        if self.phase != from {
            return Err(TurnError::InvalidTransition {
                turn_id: self.id,
                from: self.phase.to_string(),
                to: to.to_string(),
            });
        }
        self.phase = to;
        Ok(())
    }

    /// `received → classified`. The intent can be assigned once.
    pub fn assign_intent(&mut self, intent: Intent) -> Result<(), TurnError> {
        if let Some(existing) = self.intent {
            return Err(TurnError::IntentAlreadyAssigned {
                turn_id: self.id,
                intent: existing.to_string(),
            });
        }
        self.transition(TurnPhase::Received, TurnPhase::Classified)?;
        self.intent = Some(intent);
        Ok(())
    }

    /// `classified → routed`.
    pub fn assign_handler(&mut self, handler: HandlerKind) -> Result<(), TurnError> {
        self.transition(TurnPhase::Classified, TurnPhase::Routed)?;
        self.handler = Some(handler);
        Ok(())
    }

    /// `routed → handled`. Requires a response.
    pub fn mark_handled(&mut self) -> Result<(), TurnError> {
        if self.response.is_none() {
            return Err(TurnError::Incomplete {
                turn_id: self.id,
                missing: "response".into(),
            });
        }
        self.transition(TurnPhase::Routed, TurnPhase::Handled)
    }

    /// `handled → terminal`.
    pub fn terminate(&mut self) -> Result<(), TurnError> {
        self.transition(TurnPhase::Handled, TurnPhase::Terminal)
    }

    /// Jump to terminal with a failure response, from any phase.
    pub fn abort(&mut self, message: impl Into<String>) {
        self.response = Some(message.into());
        self.error = true;
        self.draft = None;
        self.phase = TurnPhase::Terminal;
    }

    /// Successful response.
    pub fn respond(&mut self, text: impl Into<String>) {
        self.response = Some(text.into());
        self.error = false;
    }

    /// Degraded or clarification response.
    pub fn fail(&mut self, text: impl Into<String>) {
        self.response = Some(text.into());
        self.error = true;
    }

    /// Consume the state into its terminal record.
    pub fn into_outcome(self) -> TurnOutcome {
        debug_assert_eq!(self.phase, TurnPhase::Terminal);
        TurnOutcome {
            turn_id: self.id,
            intent: self.intent.unwrap_or(Intent::Unknown),
            handler: self.handler.unwrap_or(HandlerKind::Fallback),
            response: self.response.unwrap_or_default(),
            error: self.error,
            draft: self.draft,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_serializes_snake_case() {
        for intent in Intent::ALL {
            let json = serde_json::to_string(&intent).unwrap();
            assert_eq!(json, format!("\"{}\"", intent.label()));
        }
    }

    #[test]
    fn context_keeps_most_recent_entries() {
        let context: Vec<String> = (1..=8).map(|i| format!("line {i}")).collect();
        let state = ConversationState::new("hi", context);
        assert_eq!(state.context().len(), MAX_CONTEXT_ENTRIES);
        assert_eq!(state.context()[0], "line 4");
        assert_eq!(state.context()[4], "line 8");
    }

    #[test]
    fn forward_traversal() {
        let mut state = ConversationState::new("What is our refund policy?", vec![]);
        assert_eq!(state.phase(), TurnPhase::Received);

        state.assign_intent(Intent::RetrieveInfo).unwrap();
        state.assign_handler(HandlerKind::RetrieveInfo).unwrap();
        state.respond("Refunds within 30 days.");
        state.mark_handled().unwrap();
        state.terminate().unwrap();

        let outcome = state.into_outcome();
        assert_eq!(outcome.intent, Intent::RetrieveInfo);
        assert_eq!(outcome.handler, HandlerKind::RetrieveInfo);
        assert!(!outcome.error);
    }

    #[test]
    fn intent_assigned_once() {
        let mut state = ConversationState::new("x", vec![]);
        state.assign_intent(Intent::ReadEmail).unwrap();
        let err = state.assign_intent(Intent::DraftEmail).unwrap_err();
        assert!(matches!(err, TurnError::IntentAlreadyAssigned { .. }));
        assert_eq!(state.intent(), Some(Intent::ReadEmail));
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut state = ConversationState::new("x", vec![]);
        let err = state.assign_handler(HandlerKind::Fallback).unwrap_err();
        assert!(matches!(err, TurnError::InvalidTransition { .. }));
        assert!(state.terminate().is_err());
    }

    #[test]
    fn handled_requires_response() {
        let mut state = ConversationState::new("x", vec![]);
        state.assign_intent(Intent::Unknown).unwrap();
        state.assign_handler(HandlerKind::Fallback).unwrap();
        assert!(matches!(
            state.mark_handled(),
            Err(TurnError::Incomplete { .. })
        ));
    }

    #[test]
    fn abort_sets_error_and_drops_draft() {
        let mut state = ConversationState::new("x", vec![]);
        state.assign_intent(Intent::DraftEmail).unwrap();
        state.draft = Some(EmailDraft {
            to: None,
            subject: "s".into(),
            body: "b".into(),
            sources: vec![],
        });
        state.abort("Something went wrong.");
        assert_eq!(state.phase(), TurnPhase::Terminal);

        let outcome = state.into_outcome();
        assert!(outcome.error);
        assert!(outcome.draft.is_none());
        assert_eq!(outcome.handler, HandlerKind::Fallback);
    }
}
