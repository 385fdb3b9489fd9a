//! Shared domain types for Chatline.
//!
//! This crate contains the types used across the support-chat workspace:
//! persisted chat messages, topic events, LLM request/stream shapes,
//! configuration, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod llm;
