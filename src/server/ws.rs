//! Text turns over WebSocket.
//!
//! Each text frame is one turn. The server answers with a `processing`
//! frame followed by a `complete` frame carrying the outcome.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::AppState;
use crate::pipeline::TurnRequest;

#[derive(Debug, Deserialize)]
struct TextFrame {
    #[serde(default)]
    text: String,
    #[serde(default)]
    context: Vec<String>,
}

/// Accepts `{"text": ..., "context": [...]}` or plain text.
fn parse_frame(raw: &str) -> TurnRequest {
    match serde_json::from_str::<TextFrame>(raw) {
        Ok(frame) => TurnRequest::new(frame.text).with_context(frame.context),
        Err(_) => TurnRequest::new(raw),
    }
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");

    while let Some(result) = socket.recv().await {
        match result {
            Ok(Message::Text(text)) => {
                if !run_text_turn(&mut socket, &state, &text).await {
                    debug!("Client disconnected during send");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                let frame = json!({
                    "status": "error",
                    "error": "Binary frames are not supported; send text",
                });
                if !send_json(&mut socket, &frame).await {
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                if socket.send(Message::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket client disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    info!("WebSocket connection closed");
}

/// Returns false once the client can no longer be written to.
async fn run_text_turn(socket: &mut WebSocket, state: &AppState, raw: &str) -> bool {
    let request = parse_frame(raw);
    if request.text.trim().is_empty() {
        return send_json(
            socket,
            &json!({ "status": "error", "error": "No text provided" }),
        )
        .await;
    }

    if !send_json(socket, &json!({ "status": "processing", "text": request.text })).await {
        return false;
    }

    let outcome = state.orchestrator.run_turn(request).await;
    let mut frame = match serde_json::to_value(&outcome) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Failed to serialize turn outcome");
            return send_json(
                socket,
                &json!({ "status": "error", "error": "Failed to encode response" }),
            )
            .await;
        }
    };
    if let Value::Object(map) = &mut frame {
        map.insert("status".into(), Value::String("complete".into()));
    }
    send_json(socket, &frame).await
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> bool {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .is_ok()
}
