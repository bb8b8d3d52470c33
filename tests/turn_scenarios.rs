//! End-to-end turns through the orchestrator with scripted collaborators.

mod common;

use std::sync::Arc;

use async_trait::async_trait;

use common::{RecordingMail, ScriptedLlm, StaticKnowledge, orchestrator, summary};
use maildesk::error::HandlerError;
use maildesk::knowledge::KnowledgeSnippet;
use maildesk::mail::MailCommand;
use maildesk::pipeline::handlers::{
    IntentHandler, NOT_FOUND_RESPONSE, REPHRASE_RESPONSE, SEARCH_UNAVAILABLE_RESPONSE,
};
use maildesk::pipeline::orchestrator::GENERIC_FAILURE_RESPONSE;
use maildesk::pipeline::{ConversationState, HandlerKind, Intent, TurnRequest, route};

fn refund_snippet(score: f32) -> KnowledgeSnippet {
    KnowledgeSnippet::new(
        "Customers may request a full refund within 30 days of purchase.",
        score,
        "documents:refunds",
    )
}

#[tokio::test]
async fn refund_question_is_answered_from_knowledge() {
    let llm = Arc::new(ScriptedLlm::new([
        r#"{"intent": "retrieve_info"}"#,
        "You can request a full refund within 30 days of purchase.",
    ]));
    let kb = Arc::new(StaticKnowledge::with(vec![refund_snippet(0.91)]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![]));
    let orch = orchestrator(llm, kb, mail.clone());

    let outcome = orch
        .run_turn(TurnRequest::new("What is our refund policy?"))
        .await;

    assert_eq!(outcome.intent, Intent::RetrieveInfo);
    assert_eq!(outcome.handler, HandlerKind::RetrieveInfo);
    assert!(outcome.response.contains("30 days"));
    assert!(!outcome.error);
    assert!(mail.commands().is_empty());
}

#[tokio::test]
async fn gibberish_asks_to_rephrase_after_one_model_call() {
    let llm = Arc::new(ScriptedLlm::new([r#"{"intent": "unknown"}"#]));
    let kb = Arc::new(StaticKnowledge::with(vec![refund_snippet(0.91)]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![]));
    let orch = orchestrator(llm.clone(), kb.clone(), mail.clone());

    let outcome = orch.run_turn(TurnRequest::new("asdkjasd")).await;

    assert_eq!(outcome.handler, HandlerKind::Fallback);
    assert_eq!(outcome.response, REPHRASE_RESPONSE);
    assert!(!outcome.error);
    assert_eq!(llm.calls(), 1);
    assert_eq!(kb.calls(), 0);
    assert!(mail.commands().is_empty());
}

#[tokio::test]
async fn archive_without_target_asks_which_email() {
    let llm = Arc::new(ScriptedLlm::new(["manage_inbox"]));
    let kb = Arc::new(StaticKnowledge::with(vec![]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![summary(
        "1",
        "alice@example.com",
        "Hi",
    )]));
    let orch = orchestrator(llm, kb, mail.clone());

    let outcome = orch.run_turn(TurnRequest::new("archive the email")).await;

    assert_eq!(outcome.handler, HandlerKind::ManageInbox);
    assert!(outcome.response.contains("Which email"));
    assert!(mail.commands().is_empty());
}

#[tokio::test]
async fn retrieval_outage_is_degraded_not_fatal() {
    let llm = Arc::new(ScriptedLlm::new([r#"{"intent": "retrieve_info"}"#]));
    let kb = Arc::new(StaticKnowledge::unavailable());
    let mail = Arc::new(RecordingMail::with_inbox(vec![]));
    let orch = orchestrator(llm.clone(), kb, mail);

    let outcome = orch
        .run_turn(TurnRequest::new("What is our refund policy?"))
        .await;

    assert_eq!(outcome.response, SEARCH_UNAVAILABLE_RESPONSE);
    assert!(outcome.error);
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn relevance_threshold_is_inclusive() {
    let llm = Arc::new(ScriptedLlm::new([
        "retrieve_info",
        "Customers may request a full refund within 30 days of purchase.",
        "retrieve_info",
    ]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![]));

    let at_threshold = orchestrator(
        llm.clone(),
        Arc::new(StaticKnowledge::with(vec![refund_snippet(0.7)])),
        mail.clone(),
    );
    let outcome = at_threshold
        .run_turn(TurnRequest::new("What is our refund policy?"))
        .await;
    assert!(outcome.response.contains("30 days"));

    let below = orchestrator(
        llm.clone(),
        Arc::new(StaticKnowledge::with(vec![refund_snippet(0.69)])),
        mail,
    );
    let outcome = below
        .run_turn(TurnRequest::new("What is our refund policy?"))
        .await;
    assert_eq!(outcome.response, NOT_FOUND_RESPONSE);
    assert!(!outcome.error);
    assert_eq!(llm.calls(), 3);
}

#[tokio::test]
async fn unparseable_classification_falls_back() {
    let llm = Arc::new(ScriptedLlm::new(["I think the user wants to send something"]));
    let kb = Arc::new(StaticKnowledge::with(vec![]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![]));
    let orch = orchestrator(llm, kb, mail.clone());

    let outcome = orch.run_turn(TurnRequest::new("send it")).await;

    assert_eq!(outcome.intent, Intent::Unknown);
    assert_eq!(outcome.handler, HandlerKind::Fallback);
    assert!(mail.commands().is_empty());
}

#[tokio::test]
async fn drafting_never_sends() {
    let llm = Arc::new(ScriptedLlm::new([
        "draft_email",
        r#"{"subject": "Project update", "body": "Hi Bob,\n\nThe project is on track.\n\nThanks"}"#,
    ]));
    let kb = Arc::new(StaticKnowledge::with(vec![]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![]));
    let orch = orchestrator(llm, kb, mail.clone());

    let outcome = orch
        .run_turn(TurnRequest::new(
            "Draft an email to bob@example.com about the project status",
        ))
        .await;

    assert_eq!(outcome.handler, HandlerKind::DraftEmail);
    let draft = outcome.draft.expect("draft returned");
    assert_eq!(draft.to.as_deref(), Some("bob@example.com"));
    assert_eq!(draft.subject, "Project update");
    assert!(outcome.response.starts_with("I've drafted an email for you:"));
    assert!(
        !mail
            .commands()
            .iter()
            .any(|c| matches!(c, MailCommand::Send { .. }))
    );
}

#[tokio::test]
async fn listing_size_is_capped() {
    let llm = Arc::new(ScriptedLlm::new(["read_email"]));
    let kb = Arc::new(StaticKnowledge::with(vec![]));
    let inbox = (1..=30)
        .map(|i| summary(&i.to_string(), "team@example.com", &format!("Update {i}")))
        .collect();
    let mail = Arc::new(RecordingMail::with_inbox(inbox));
    let orch = orchestrator(llm, kb, mail.clone());

    let outcome = orch
        .run_turn(TurnRequest::new("show me my last 50 emails"))
        .await;

    assert!(matches!(
        mail.commands()[0],
        MailCommand::List { max_results: 20, .. }
    ));
    assert!(outcome.response.contains("20. From team@example.com"));
    assert!(!outcome.response.contains("21. From"));
}

#[tokio::test]
async fn concurrent_turns_are_independent() {
    let llm = Arc::new(ScriptedLlm::new(["unknown", "unknown"]));
    let kb = Arc::new(StaticKnowledge::with(vec![]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![]));
    let orch = Arc::new(orchestrator(llm, kb, mail));

    let (a, b) = tokio::join!(
        orch.run_turn(TurnRequest::new("first")),
        orch.run_turn(TurnRequest::new("second")),
    );

    assert_ne!(a.turn_id, b.turn_id);
    assert_eq!(a.response, REPHRASE_RESPONSE);
    assert_eq!(b.response, REPHRASE_RESPONSE);
}

#[test]
fn every_intent_has_exactly_one_handler() {
    for intent in Intent::ALL {
        let kind = route(intent);
        assert_eq!(kind, route(intent));
        if intent == Intent::Unknown {
            assert_eq!(kind, HandlerKind::Fallback);
        } else {
            assert_ne!(kind, HandlerKind::Fallback);
        }
    }
}

struct ExplodingHandler;

#[async_trait]
impl IntentHandler for ExplodingHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::ReadEmail
    }

    async fn handle(&self, _state: &mut ConversationState) -> Result<(), HandlerError> {
        Err(HandlerError::Failed {
            handler: "read_email".into(),
            reason: "mailbox state corrupted".into(),
        })
    }
}

#[tokio::test]
async fn handler_error_becomes_generic_failure() {
    let llm = Arc::new(ScriptedLlm::new(["read_email"]));
    let kb = Arc::new(StaticKnowledge::with(vec![]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![]));
    let orch = orchestrator(llm, kb, mail).with_handler(Arc::new(ExplodingHandler));

    let outcome = orch.run_turn(TurnRequest::new("read my emails")).await;

    assert_eq!(outcome.response, GENERIC_FAILURE_RESPONSE);
    assert!(outcome.error);
    assert_eq!(outcome.handler, HandlerKind::ReadEmail);
}

#[tokio::test]
async fn identical_turns_dispatch_identically() {
    let llm = Arc::new(ScriptedLlm::new([
        r#"{"intent": "read_email"}"#,
        r#"{"intent": "read_email"}"#,
    ]));
    let kb = Arc::new(StaticKnowledge::with(vec![]));
    let mail = Arc::new(RecordingMail::with_inbox(vec![summary(
        "7",
        "carol@example.com",
        "Invoice",
    )]));
    let orch = orchestrator(llm, kb, mail.clone());

    let first = orch.run_turn(TurnRequest::new("any new emails?")).await;
    let second = orch.run_turn(TurnRequest::new("any new emails?")).await;

    assert_eq!(first.intent, second.intent);
    assert_eq!(first.handler, second.handler);
    assert_eq!(first.response, second.response);
    assert_eq!(mail.commands()[0], mail.commands()[1]);
}
