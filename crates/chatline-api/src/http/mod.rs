//! HTTP layer for Chatline.
//!
//! Axum router at `/api/v1/` with SSE chat streaming, envelope responses,
//! topic subscriptions over WebSocket and SSE, and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
