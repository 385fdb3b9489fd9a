//! Axum router configuration with middleware.
//!
//! API routes are under `/api/v1/`, the WebSocket subscription under `/ws/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Chat turns
        .route("/chat", post(handlers::chat::stream_chat))
        .route("/chat/finalize", post(handlers::chat::finalize_reply))
        // Session transcript and live events
        .route(
            "/sessions/{session_id}/messages",
            get(handlers::session::get_messages),
        )
        .route(
            "/sessions/{session_id}/events",
            get(handlers::session::stream_events),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ws/sessions/{session_id}", get(handlers::ws::ws_handler))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use chatline_core::broadcast::{Broadcaster, TopicHub};
    use chatline_core::chat::SessionCoordinator;
    use chatline_core::llm::{CompletionStreamer, LlmProvider, ProviderStream};
    use chatline_infra::sqlite::message::SqliteMessageStore;
    use chatline_infra::sqlite::pool::DatabasePool;
    use chatline_types::chat::{ConnectionId, Sender};
    use chatline_types::config::{FinalizeMode, PolicyConfig};
    use chatline_types::event::Topic;
    use chatline_types::llm::{CompletionRequest, LlmError, StreamEvent};

    /// Replays fixed deltas, or fails before producing any output.
    struct CannedProvider {
        deltas: Vec<&'static str>,
        fail: bool,
    }

    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn stream(&self, _request: CompletionRequest) -> ProviderStream {
            let deltas = self.deltas.clone();
            let fail = self.fail;
            Box::pin(async_stream::stream! {
                yield Ok(StreamEvent::Connected);
                if fail {
                    yield Err(LlmError::Overloaded("busy".to_string()));
                    return;
                }
                for text in deltas {
                    yield Ok(StreamEvent::TextDelta { text: text.to_string() });
                }
                yield Ok(StreamEvent::Done);
            })
        }
    }

    async fn test_state(provider: CannedProvider, finalize: FinalizeMode) -> (AppState, TempDir) {
        let tmp = TempDir::new().unwrap();
        let url = format!("sqlite://{}/test.db", tmp.path().display());
        let pool = DatabasePool::new(&url).await.unwrap();
        let store = SqliteMessageStore::new(pool);

        let streamer = CompletionStreamer::new(Arc::new(provider), "test-model");
        let policy = PolicyConfig {
            finalize,
            ..PolicyConfig::default()
        };
        let coordinator =
            SessionCoordinator::new(Arc::new(store), Arc::new(TopicHub::new(16)), streamer)
                .with_policy(policy);
        (AppState::new(coordinator), tmp)
    }

    fn replying(deltas: Vec<&'static str>) -> CannedProvider {
        CannedProvider {
            deltas,
            fail: false,
        }
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _tmp) = test_state(replying(vec![]), FinalizeMode::Server).await;
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("\"ok\""));
    }

    #[tokio::test]
    async fn chat_streams_deltas_and_persists_both_messages() {
        let (state, _tmp) = test_state(replying(vec!["Hi", " there"]), FinalizeMode::Server).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(json_post(
                "/api/v1/chat",
                serde_json::json!({
                    "session_id": "s1",
                    "message": "hello",
                    "connection_id": "tab-1"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        assert!(body.contains("event: user_message"));
        assert!(body.contains("event: text_delta"));
        assert!(body.contains("event: done"));
        assert!(body.contains("Hi there"));

        let transcript = state.coordinator.transcript("s1").await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].sender, Sender::User);
        assert_eq!(transcript[1].sender, Sender::Assistant);
        assert_eq!(transcript[1].text, "Hi there");
    }

    #[tokio::test]
    async fn chat_broadcast_skips_the_sender() {
        let (state, _tmp) = test_state(replying(vec!["ok"]), FinalizeMode::Server).await;
        let topic = Topic::for_session("s1");
        let mut own = state
            .hub()
            .subscribe(&topic, ConnectionId::new("tab-1"))
            .unwrap();
        let mut other = state
            .hub()
            .subscribe(&topic, ConnectionId::new("tab-2"))
            .unwrap();

        let response = build_router(state.clone())
            .oneshot(json_post(
                "/api/v1/chat",
                serde_json::json!({ "session_id": "s1", "message": "hello", "connection_id": "tab-1" }),
            ))
            .await
            .unwrap();
        body_text(response).await;

        let mut senders = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(std::time::Duration::from_secs(1), other.recv())
                .await
                .unwrap()
                .unwrap();
            senders.push(event.message().sender);
        }
        assert!(senders.contains(&Sender::User));
        assert!(senders.contains(&Sender::Assistant));

        let echoed =
            tokio::time::timeout(std::time::Duration::from_millis(100), own.recv()).await;
        assert!(echoed.is_err(), "sender must not receive its own messages");
    }

    #[tokio::test]
    async fn blank_message_is_rejected() {
        let (state, _tmp) = test_state(replying(vec!["x"]), FinalizeMode::Server).await;
        let response = build_router(state.clone())
            .oneshot(json_post(
                "/api/v1/chat",
                serde_json::json!({ "session_id": "s1", "message": "   " }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("VALIDATION_ERROR"));
        assert!(state.coordinator.transcript("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chat_without_connection_is_rejected() {
        let (state, _tmp) = test_state(replying(vec!["x"]), FinalizeMode::Client).await;
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(json_post(
                "/api/v1/chat",
                serde_json::json!({ "session_id": "s1", "message": "hello" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("VALIDATION_ERROR"));

        let response = app
            .oneshot(json_post(
                "/api/v1/chat/finalize",
                serde_json::json!({ "session_id": "s1", "text": "reply", "connection_id": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.coordinator.transcript("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let (state, _tmp) = test_state(replying(vec![]), FinalizeMode::Server).await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn provider_failure_before_output_is_bad_gateway() {
        let provider = CannedProvider {
            deltas: vec![],
            fail: true,
        };
        let (state, _tmp) = test_state(provider, FinalizeMode::Server).await;
        let response = build_router(state.clone())
            .oneshot(json_post(
                "/api/v1/chat",
                serde_json::json!({ "session_id": "s1", "message": "hello", "connection_id": "tab-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = body_text(response).await;
        assert!(body.contains("GENERATION_FAILED"));
        assert!(!body.contains("busy"), "provider detail must not leak");

        // The user message was stored; no assistant message was.
        let transcript = state.coordinator.transcript("s1").await.unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].sender, Sender::User);
    }

    #[tokio::test]
    async fn finalize_conflicts_in_server_mode() {
        let (state, _tmp) = test_state(replying(vec![]), FinalizeMode::Server).await;
        let response = build_router(state)
            .oneshot(json_post(
                "/api/v1/chat/finalize",
                serde_json::json!({ "session_id": "s1", "text": "done", "connection_id": "tab-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn client_mode_leaves_persistence_to_finalize() {
        let (state, _tmp) = test_state(replying(vec!["partial"]), FinalizeMode::Client).await;
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(json_post(
                "/api/v1/chat",
                serde_json::json!({ "session_id": "s1", "message": "hello", "connection_id": "tab-1" }),
            ))
            .await
            .unwrap();
        let body = body_text(response).await;
        assert!(body.contains("event: done\ndata: {}"));
        assert_eq!(state.coordinator.transcript("s1").await.unwrap().len(), 1);

        let response = app
            .oneshot(json_post(
                "/api/v1/chat/finalize",
                serde_json::json!({ "session_id": "s1", "text": "partial", "connection_id": "tab-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["data"]["text"], "partial");
        assert_eq!(body["data"]["sender"], "assistant");

        let transcript = state.coordinator.transcript("s1").await.unwrap();
        assert_eq!(transcript.len(), 2);
    }

    #[tokio::test]
    async fn unknown_session_has_empty_transcript() {
        let (state, _tmp) = test_state(replying(vec![]), FinalizeMode::Server).await;
        let response = build_router(state)
            .oneshot(
                Request::get("/api/v1/sessions/never-used/messages")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["data"], serde_json::json!([]));
        assert_eq!(body["_links"]["self"], "/api/v1/sessions/never-used/messages");
    }
}
