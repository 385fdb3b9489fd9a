//! AnthropicProvider: concrete [`LlmProvider`] implementation for Anthropic
//! Claude.
//!
//! Sends streaming requests to the Messages API (`/v1/messages`). The API key
//! is held as a [`SecretString`] and only exposed when building the request
//! headers.

use std::time::Duration;

use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use chatline_core::llm::{LlmProvider, ProviderStream};
use chatline_types::llm::{CompletionRequest, MessageRole, StreamEvent};

use super::streaming::decode_messages_stream;
use super::types::{AnthropicMessage, AnthropicRequest};
use crate::llm::http::send_streaming;

/// Anthropic Claude LLM provider.
///
/// Does NOT derive Debug so the API key cannot leak through formatting.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl AnthropicProvider {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";

    pub fn new(api_key: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Override the base URL (proxies, gateways).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Convert a generic request into the Messages API shape.
    ///
    /// The API wants strictly alternating turns starting with `user`, so
    /// leading assistant turns are dropped and consecutive same-role turns
    /// are merged. System-role messages are folded into `system`.
    pub(crate) fn build_request(request: &CompletionRequest) -> AnthropicRequest {
        let mut system_parts: Vec<String> = request.system.iter().cloned().collect();
        let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            let role = match message.role {
                MessageRole::System => {
                    system_parts.push(message.content.clone());
                    continue;
                }
                MessageRole::Assistant if messages.is_empty() => continue,
                role => role.to_string(),
            };

            match messages.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&message.content);
                }
                _ => messages.push(AnthropicMessage {
                    role,
                    content: message.content.clone(),
                }),
            }
        }

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            messages,
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            stream: true,
            temperature: request.temperature,
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn stream(&self, request: CompletionRequest) -> ProviderStream {
        let body = Self::build_request(&request);
        let builder = self
            .client
            .post(self.endpoint())
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .json(&body);

        Box::pin(async_stream::try_stream! {
            let response = send_streaming(builder).await?;
            yield StreamEvent::Connected;

            let mut events = decode_messages_stream(response.bytes_stream());
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

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_types::llm::Message;

    fn request(messages: Vec<Message>, system: Option<&str>) -> CompletionRequest {
        CompletionRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            messages,
            system: system.map(str::to_string),
            max_tokens: 512,
            temperature: None,
            stream: true,
        }
    }

    #[test]
    fn system_prompt_goes_to_system_field() {
        let body = AnthropicProvider::build_request(&request(
            vec![Message::new(MessageRole::User, "Hi")],
            Some("You are a support assistant."),
        ));

        assert_eq!(body.system.as_deref(), Some("You are a support assistant."));
        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].role, "user");
        assert!(body.stream);
    }

    #[test]
    fn leading_assistant_turns_are_dropped() {
        let body = AnthropicProvider::build_request(&request(
            vec![
                Message::new(MessageRole::Assistant, "Welcome! How can I help?"),
                Message::new(MessageRole::User, "Where is my order?"),
            ],
            None,
        ));

        assert_eq!(body.messages.len(), 1);
        assert_eq!(body.messages[0].content, "Where is my order?");
        assert!(body.system.is_none());
    }

    #[test]
    fn consecutive_same_role_turns_are_merged() {
        let body = AnthropicProvider::build_request(&request(
            vec![
                Message::new(MessageRole::User, "Hello"),
                Message::new(MessageRole::User, "Anyone there?"),
                Message::new(MessageRole::Assistant, "Yes!"),
            ],
            None,
        ));

        assert_eq!(
            body.messages,
            vec![
                AnthropicMessage {
                    role: "user".to_string(),
                    content: "Hello\n\nAnyone there?".to_string(),
                },
                AnthropicMessage {
                    role: "assistant".to_string(),
                    content: "Yes!".to_string(),
                },
            ]
        );
    }

    #[test]
    fn endpoint_uses_base_url() {
        let provider = AnthropicProvider::new(SecretString::from("sk-test".to_string()))
            .with_base_url("http://proxy.local/");
        assert_eq!(provider.endpoint(), "http://proxy.local/v1/messages");
        assert_eq!(provider.name(), "anthropic");
    }
}
