//! OpenAI-compatible LLM provider implementation.
//!
//! A single [`OpenAiCompatibleProvider`] serves any server that speaks the
//! Chat Completions streaming protocol (OpenAI, Ollama, vLLM, LM Studio,
//! OpenRouter) via a configurable base URL.

pub mod streaming;
pub mod types;

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use chatline_core::llm::{LlmProvider, ProviderStream};
use chatline_types::llm::{CompletionRequest, MessageRole, StreamEvent};

use self::streaming::decode_chat_completion_stream;
use self::types::{ChatCompletionMessage, ChatCompletionRequest, StreamOptions};
use super::http::send_streaming;

/// Unified provider for any OpenAI-compatible API.
///
/// Does NOT derive Debug so the API key cannot leak through formatting.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Create a provider for `base_url` (e.g. `http://localhost:11434/v1`).
    ///
    /// `api_key` may be `None` for local servers that do not authenticate.
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// OpenAI itself.
    pub fn openai(api_key: SecretString) -> Self {
        Self::new(Self::DEFAULT_BASE_URL, Some(api_key))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Convert a generic request into the Chat Completions shape. The system
    /// prompt becomes the leading `system` message.
    pub(crate) fn build_request(request: &CompletionRequest) -> ChatCompletionRequest {
        let system = request
            .system
            .iter()
            .map(|prompt| ChatCompletionMessage {
                role: MessageRole::System.to_string(),
                content: prompt.clone(),
            });
        let turns = request.messages.iter().map(|m| ChatCompletionMessage {
            role: m.role.to_string(),
            content: m.content.clone(),
        });

        ChatCompletionRequest {
            model: request.model.clone(),
            messages: system.chain(turns).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    fn stream(&self, request: CompletionRequest) -> ProviderStream {
        let body = Self::build_request(&request);
        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        Box::pin(async_stream::try_stream! {
            let response = send_streaming(builder).await?;
            yield StreamEvent::Connected;

            let mut events = decode_chat_completion_stream(response.bytes_stream());
            while let Some(event) = events.next().await {
                let event = event?;
                let done = event == StreamEvent::Done;
                yield event;
                if done {
                    break;
                }
            }
        })
    }
}
