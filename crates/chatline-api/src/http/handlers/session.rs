//! Session transcript and subscription endpoints.
//!
//! Sessions are implicit: any non-empty id is valid, and an id nobody has
//! written to yields an empty transcript.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use tracing::debug;

use chatline_core::broadcast::Broadcaster;
use chatline_types::chat::ChatMessage;
use chatline_types::error::ChatError;
use chatline_types::event::Topic;

use super::ws::{SubscribeParams, resolve_connection};
use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /api/v1/sessions/{session_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<ApiResponse<Vec<ChatMessage>>, AppError> {
    let started = Instant::now();
    let messages = state.coordinator.transcript(&session_id).await?;

    let href = format!("/api/v1/sessions/{session_id}/messages");
    Ok(ApiResponse::success(messages, started).with_link("self", &href))
}

/// GET /api/v1/sessions/{session_id}/events?connection_id=...
///
/// SSE alternative to the WebSocket subscription. Each `new-message` event
/// carries the `{ "event", "payload" }` envelope as its data.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<SubscribeParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if session_id.trim().is_empty() {
        return Err(ChatError::InvalidRequest("session_id is required".to_string()).into());
    }

    let connection = resolve_connection(params.connection_id);
    let mut subscription = state
        .hub()
        .subscribe(&Topic::for_session(&session_id), connection)
        .map_err(ChatError::from)?;
    debug!(session_id = %session_id, connection_id = %subscription.connection(), "SSE subscriber attached");

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(data) => yield Ok(Event::default().event(event.name()).data(data)),
                Err(err) => tracing::warn!("Failed to serialize TopicEvent: {err}"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
