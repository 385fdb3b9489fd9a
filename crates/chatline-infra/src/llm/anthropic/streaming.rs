//! SSE decoding for the Anthropic Messages API.
//!
//! Event order on the wire:
//! 1. `message_start` with initial usage
//! 2. per block: `content_block_start`, N x `content_block_delta`, `content_block_stop`
//! 3. `message_delta` with the stop reason and cumulative usage
//! 4. `message_stop`
//!
//! `ping` may appear anywhere; `error` may appear mid-stream.

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use chatline_core::llm::ProviderStream;
use chatline_types::llm::{LlmError, StopReason, StreamEvent, Usage};

use super::types::{
    AnthropicDelta, ContentBlockDeltaPayload, ErrorPayload, MessageDeltaPayload,
    MessageStartPayload,
};

/// Decode a raw SSE byte stream into provider-agnostic events.
pub fn decode_messages_stream<S, B, E>(bytes: S) -> ProviderStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut events = Box::pin(bytes.eventsource());
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            for mapped in map_event(&event.event, &event.data)? {
                yield mapped;
            }
        }
    })
}

/// Map one named SSE event to zero or more stream events.
pub fn map_event(event_type: &str, data: &str) -> Result<Vec<StreamEvent>, LlmError> {
    match event_type {
        "message_start" => {
            let payload: MessageStartPayload = parse(event_type, data)?;
            debug!(message_id = %payload.message.id, "Anthropic message started");
            Ok(payload
                .message
                .usage
                .map(|usage| {
                    vec![StreamEvent::Usage(Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    })]
                })
                .unwrap_or_default())
        }
        "content_block_delta" => {
            let payload: ContentBlockDeltaPayload = parse(event_type, data)?;
            match payload.delta {
                AnthropicDelta::TextDelta { text } if !text.is_empty() => {
                    Ok(vec![StreamEvent::TextDelta { text }])
                }
                _ => Ok(Vec::new()),
            }
        }
        "message_delta" => {
            let payload: MessageDeltaPayload = parse(event_type, data)?;
            let mut events = Vec::new();
            if let Some(reason) = payload.delta.stop_reason {
                let stop_reason = reason.parse().unwrap_or_else(|_| {
                    debug!(stop_reason = %reason, "Unrecognized stop reason");
                    StopReason::EndTurn
                });
                events.push(StreamEvent::MessageDelta { stop_reason });
            }
            events.push(StreamEvent::Usage(Usage {
                input_tokens: payload.usage.input_tokens,
                output_tokens: payload.usage.output_tokens,
            }));
            Ok(events)
        }
        "message_stop" => Ok(vec![StreamEvent::Done]),
        "error" => {
            let payload: ErrorPayload = parse(event_type, data)?;
            Err(map_stream_error(&payload.error.error_type, payload.error.message))
        }
        "ping" | "content_block_start" | "content_block_stop" => Ok(Vec::new()),
        other => {
            trace!(event_type = other, "Ignoring unknown Anthropic event");
            Ok(Vec::new())
        }
    }
}

fn parse<T: DeserializeOwned>(event_type: &str, data: &str) -> Result<T, LlmError> {
    serde_json::from_str(data)
        .map_err(|e| LlmError::Deserialization(format!("invalid {event_type} payload: {e}")))
}

fn map_stream_error(error_type: &str, message: String) -> LlmError {
    match error_type {
        "overloaded_error" => LlmError::Overloaded(message),
        "rate_limit_error" => LlmError::RateLimited {
            retry_after_ms: None,
        },
        "authentication_error" | "permission_error" => LlmError::AuthenticationFailed,
        _ => LlmError::Provider { message },
    }
}
