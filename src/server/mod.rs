//! HTTP + WebSocket text surface over the orchestrator.

mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::MailError;
use crate::mail::MailClient;
use crate::pipeline::handlers::send_draft;
use crate::pipeline::{EmailDraft, Orchestrator, TurnRequest};

/// Collaborator names reported by `/health`.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub llm: String,
    pub knowledge: String,
    pub mail: String,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Used only for explicit draft sends.
    pub mail: Arc<dyn MailClient>,
    pub services: ServiceInfo,
    pub environment: String,
}

/// Build the Axum router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/text", post(process_text))
        .route("/api/drafts/send", post(send_draft_route))
        .route("/ws/text", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Status ──────────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "maildesk",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "environment": state.environment,
        "services": {
            "llm": state.services.llm,
            "knowledge": state.services.knowledge,
            "mail": state.services.mail,
        }
    }))
}

// ── Text turns ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TextBody {
    #[serde(default)]
    text: String,
    #[serde(default)]
    context: Vec<String>,
}

async fn process_text(State(state): State<AppState>, Json(body): Json<TextBody>) -> Response {
    if body.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No text provided");
    }
    let request = TurnRequest::new(body.text).with_context(body.context);
    let outcome = state.orchestrator.run_turn(request).await;
    Json(outcome).into_response()
}

// ── Draft send ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SendDraftBody {
    #[serde(default)]
    to: Option<String>,
    draft: EmailDraft,
}

async fn send_draft_route(
    State(state): State<AppState>,
    Json(body): Json<SendDraftBody>,
) -> Response {
    let mut draft = body.draft;
    if let Some(to) = body.to.filter(|t| !t.trim().is_empty()) {
        draft.to = Some(to);
    }
    if draft.to.as_deref().is_none_or(|t| t.trim().is_empty()) {
        return error_response(StatusCode::BAD_REQUEST, "Draft has no recipient");
    }

    match send_draft(state.mail.as_ref(), &draft).await {
        Ok(result) if result.success => {
            info!(subject = %draft.subject, "Draft sent");
            Json(json!({ "status": "sent", "result": result })).into_response()
        }
        Ok(result) => {
            let detail = result.detail.unwrap_or_else(|| "send failed".into());
            error_response(StatusCode::BAD_GATEWAY, &detail)
        }
        Err(e) => {
            warn!(error = %e, "Draft send failed");
            let status = match e {
                MailError::InvalidCommand { .. } => StatusCode::BAD_REQUEST,
                MailError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                MailError::NotFound { .. } => StatusCode::NOT_FOUND,
                MailError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            };
            error_response(status, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
