//! LlmProvider trait definition.
//!
//! This is the core abstraction that all text-generation providers implement.
//! `stream` returns a boxed stream so the trait stays object-safe and
//! providers can be selected at runtime behind `Arc<dyn LlmProvider>`.

use std::pin::Pin;

use futures_util::Stream;

use chatline_types::llm::{CompletionRequest, LlmError, StreamEvent};

/// Boxed event stream returned by [`LlmProvider::stream`].
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;

/// Trait for LLM provider backends (OpenAI-compatible, Anthropic, ...).
///
/// Implementations live in chatline-infra. The returned stream must end with
/// `StreamEvent::Done` on success; ending without it means the provider
/// stopped early. Dropping the stream cancels the underlying HTTP request.
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "anthropic", "openai_compatible").
    fn name(&self) -> &str;

    /// Send a streaming completion request. Returns a stream of events.
    fn stream(&self, request: CompletionRequest) -> ProviderStream;
}
