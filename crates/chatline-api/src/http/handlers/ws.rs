//! WebSocket subscription to a session topic.
//!
//! `/ws/sessions/{session_id}?connection_id=...` upgrades the connection and
//! subscribes it to `chat-{session_id}`. The handler:
//!
//! - **Forwards events:** every `new-message` not excluded for this
//!   connection is pushed as a `{ "event", "payload" }` JSON text frame.
//! - **Answers pings:** `{"type":"ping"}` is answered with `{"type":"pong"}`.
//!
//! Closing the socket drops the subscription; nothing else is affected.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use chatline_core::broadcast::{Broadcaster, Subscription};
use chatline_types::chat::ConnectionId;
use chatline_types::error::ChatError;
use chatline_types::event::Topic;

use crate::http::error::AppError;
use crate::state::AppState;

/// Query parameters shared by the topic subscription endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct SubscribeParams {
    pub connection_id: Option<ConnectionId>,
}

/// The client's connection id, or a fresh one when it sent none.
///
/// A generated id never matches any publisher, so such a subscriber sees
/// every event on the topic.
pub(crate) fn resolve_connection(connection_id: Option<ConnectionId>) -> ConnectionId {
    connection_id
        .filter(|id| !id.as_str().trim().is_empty())
        .unwrap_or_else(|| ConnectionId::new(format!("anon-{}", uuid::Uuid::now_v7())))
}

/// Incoming frame from a WebSocket client. Anything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Ping,
}

/// Upgrade an HTTP request to a WebSocket subscription.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<SubscribeParams>,
) -> Result<impl IntoResponse, AppError> {
    if session_id.trim().is_empty() {
        return Err(ChatError::InvalidRequest("session_id is required".to_string()).into());
    }

    // Subscribe before upgrading so events published during the handshake
    // are not lost.
    let subscription = state
        .hub()
        .subscribe(
            &Topic::for_session(&session_id),
            resolve_connection(params.connection_id),
        )
        .map_err(ChatError::from)?;

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, subscription)))
}

/// Multiplex topic events and client frames on one task.
async fn handle_ws_connection(socket: WebSocket, mut subscription: Subscription) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    tracing::debug!(
        topic = %subscription.topic(),
        connection_id = %subscription.connection(),
        "WebSocket subscriber attached"
    );

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Failed to serialize TopicEvent: {err}");
                    }
                }
            }

            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = process_command(&text)
                            && ws_sender.send(Message::Text(reply.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    // Binary and protocol-level ping/pong frames
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!(connection_id = %subscription.connection(), "WebSocket connection closed");
}

/// Reply frame for a client command, if any.
fn process_command(text: &str) -> Option<&'static str> {
    match serde_json::from_str::<WsCommand>(text) {
        Ok(WsCommand::Ping) => Some(r#"{"type":"pong"}"#),
        Err(err) => {
            tracing::debug!(raw = %text, error = %err, "Ignoring unrecognized WebSocket frame");
            None
        }
    }
}
