//! Text-generation abstractions for Chatline.
//!
//! - `LlmProvider`: object-safe trait for concrete provider backends
//! - `CompletionStreamer`: turns a provider event stream into a finite
//!   sequence of text deltas with idle-timeout and failure semantics

pub mod provider;
pub mod streamer;

pub use provider::{LlmProvider, ProviderStream};
pub use streamer::{CompletionStreamer, DeltaStream};
