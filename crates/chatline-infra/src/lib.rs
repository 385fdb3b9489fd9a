//! Infrastructure layer for Chatline.
//!
//! Contains implementations of the ports defined in `chatline-core`: the
//! SQLite message store, streaming LLM providers (OpenAI-compatible and
//! Anthropic), and the configuration file loader.

pub mod config;
pub mod llm;
pub mod sqlite;
