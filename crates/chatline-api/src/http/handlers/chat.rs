//! Chat turn endpoints.
//!
//! POST /api/v1/chat streams the reply to the requesting client as
//! Server-Sent Events:
//! - `user_message`: `{ "message": ChatMessage }` (omitted when the stored
//!   copy could not be written under the fail-open policy)
//! - `text_delta`: `{ "text": "..." }`
//! - `done`: `{ "message": ChatMessage }` in server finalize mode, `{}` otherwise
//! - `error`: `{ "message": "..." }` generic failure text
//!
//! POST /api/v1/chat/finalize stores a reply the client assembled itself.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use chatline_core::chat::{ChatTurn, HistoryEntry, ReplyEvent, TurnReply};
use chatline_types::chat::{ChatMessage, ConnectionId, MessageContent};
use chatline_types::config::FinalizeMode;
use chatline_types::error::ChatError;

use crate::http::error::{AppError, GENERATION_FAILED_MESSAGE};
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for the chat endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: String,
    /// Plain string or structured content.
    pub message: Option<MessageContent>,
    pub timezone: Option<String>,
    /// Required; a missing id deserializes blank and fails validation.
    #[serde(default)]
    pub connection_id: ConnectionId,
    /// Optional client-side history used as generation context.
    pub history: Option<Vec<HistoryEntry>>,
}

impl From<ChatRequest> for ChatTurn {
    fn from(body: ChatRequest) -> Self {
        ChatTurn {
            session_id: body.session_id,
            message: body.message,
            timezone: body.timezone,
            connection_id: body.connection_id,
            history: body.history,
        }
    }
}

/// Request body for client-side finalization.
#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub session_id: String,
    #[serde(default)]
    pub connection_id: ConnectionId,
    pub text: String,
    pub timezone: Option<String>,
}

fn sse_event(name: &str, data: serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().event(name).data(data.to_string()))
}

fn client_message(err: &ChatError) -> &'static str {
    match err {
        ChatError::StorageUnavailable(_) => "The reply could not be saved. Please try again.",
        _ => GENERATION_FAILED_MESSAGE,
    }
}

/// POST /api/v1/chat
///
/// Validation, fail-closed storage, and provider failures that happen before
/// any output are plain JSON errors. Once the first delta exists the
/// response is committed to SSE and later failures arrive as `error` events.
pub async fn stream_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(body) = payload.map_err(|e| ChatError::InvalidRequest(e.body_text()))?;

    let TurnReply {
        user_message,
        mut events,
    } = state.coordinator.handle_user_turn(body.into()).await?;

    let first = events.next().await;
    if let Some(Err(err)) = first {
        return Err(err.into());
    }

    let sse_stream = async_stream::stream! {
        if let Some(message) = user_message {
            yield sse_event("user_message", json!({ "message": message }));
        }

        let mut next = first;
        while let Some(item) = next {
            match item {
                Ok(ReplyEvent::Delta(text)) => {
                    yield sse_event("text_delta", json!({ "text": text }));
                }
                Ok(ReplyEvent::Finished(Some(message))) => {
                    yield sse_event("done", json!({ "message": message }));
                }
                Ok(ReplyEvent::Finished(None)) => {
                    yield sse_event("done", json!({}));
                }
                Err(err) => {
                    warn!(error = %err, "Reply stream failed after output started");
                    yield sse_event("error", json!({ "message": client_message(&err) }));
                    break;
                }
            }
            next = events.next().await;
        }
    };

    Ok(Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

/// POST /api/v1/chat/finalize
pub async fn finalize_reply(
    State(state): State<AppState>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> Result<ApiResponse<ChatMessage>, AppError> {
    let started = Instant::now();
    let Json(body) = payload.map_err(|e| ChatError::InvalidRequest(e.body_text()))?;

    if state.coordinator.policy().finalize == FinalizeMode::Server {
        return Err(AppError::Conflict(
            "Replies are finalized by the server".to_string(),
        ));
    }

    let stored = state
        .coordinator
        .finalize_assistant(&body.session_id, body.text, body.timezone, &body.connection_id)
        .await?;

    let href = format!("/api/v1/sessions/{}/messages", stored.session_id);
    Ok(ApiResponse::success(stored, started).with_link("session_messages", &href))
}
