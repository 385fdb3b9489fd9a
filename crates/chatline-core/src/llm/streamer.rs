//! Completion streamer for Chatline.
//!
//! `CompletionStreamer` sends the session history to the configured provider
//! and exposes the reply as a finite, non-restartable sequence of text
//! deltas. It knows nothing about persistence or broadcast: the caller owns
//! what happens with the accumulated text.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tracing::{debug, info_span, warn};

use chatline_types::error::ChatError;
use chatline_types::llm::{CompletionRequest, LlmError, Message, StreamEvent};

use super::provider::LlmProvider;

/// Boxed stream of text deltas. Ends after the provider signals completion,
/// or yields a single `GenerationFailed` error and ends.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send + 'static>>;

/// Drives streamed completions against one provider/model.
#[derive(Clone)]
pub struct CompletionStreamer {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    temperature: Option<f64>,
    idle_timeout: Duration,
}

impl CompletionStreamer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 1024,
            temperature: None,
            idle_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Maximum silence between two provider events before giving up.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Start generating a reply to `history`.
    ///
    /// The returned stream is lazy: nothing is sent to the provider until it
    /// is first polled. Dropping it cancels the provider request.
    pub fn stream(&self, history: Vec<Message>, system_prompt: Option<String>) -> DeltaStream {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: history,
            system: system_prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        let span = info_span!(
            "gen_ai.stream",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.stream = true,
        );

        let provider = Arc::clone(&self.provider);
        let idle_timeout = self.idle_timeout;

        let deltas = async_stream::stream! {
            let mut events = provider.stream(request);
            let mut delta_count: u32 = 0;

            loop {
                let next = match tokio::time::timeout(idle_timeout, events.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let err = LlmError::Timeout(idle_timeout);
                        warn!(delta_count, error = %err, "Provider went silent");
                        yield Err(ChatError::from(err));
                        break;
                    }
                };

                match next {
                    Some(Ok(StreamEvent::TextDelta { text })) => {
                        if !text.is_empty() {
                            delta_count += 1;
                            yield Ok(text);
                        }
                    }
                    Some(Ok(StreamEvent::Done)) => {
                        debug!(delta_count, "Provider stream completed");
                        break;
                    }
                    Some(Ok(StreamEvent::Usage(usage))) => {
                        debug!(
                            gen_ai.usage.input_tokens = usage.input_tokens,
                            gen_ai.usage.output_tokens = usage.output_tokens,
                            "Token usage"
                        );
                    }
                    Some(Ok(StreamEvent::MessageDelta { stop_reason })) => {
                        debug!(%stop_reason, "Provider stop reason");
                    }
                    Some(Ok(StreamEvent::Connected)) => {}
                    Some(Err(err)) => {
                        warn!(delta_count, error = %err, "Provider stream failed");
                        yield Err(ChatError::from(err));
                        break;
                    }
                    None => {
                        warn!(delta_count, "Provider stream ended without completion");
                        yield Err(ChatError::GenerationFailed(
                            "provider stream ended before completion".to_string(),
                        ));
                        break;
                    }
                }
            }
        };

        Box::pin(StreamInSpan {
            inner: Box::pin(deltas),
            span,
        })
    }
}

impl std::fmt::Debug for CompletionStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionStreamer")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Keeps the generation span entered while the stream is polled, so the
/// span covers the whole streaming duration instead of only its creation.
struct StreamInSpan {
    inner: DeltaStream,
    span: tracing::Span,
}

impl Stream for StreamInSpan {
    type Item = Result<String, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let _enter = this.span.enter();
        this.inner.as_mut().poll_next(cx)
    }
}
