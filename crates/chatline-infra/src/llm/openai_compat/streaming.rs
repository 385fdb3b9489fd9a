//! SSE decoding for streamed Chat Completions.
//!
//! Each `data:` line carries a JSON chunk; the literal `[DONE]` ends the
//! stream. Text arrives in `choices[0].delta.content`, the stop reason in
//! `finish_reason`, and token usage in a final chunk with empty `choices`
//! when `stream_options.include_usage` was requested.

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use tracing::debug;

use chatline_core::llm::ProviderStream;
use chatline_types::llm::{LlmError, StopReason, StreamEvent, Usage};

use super::types::ChatCompletionChunk;

const DONE_SENTINEL: &str = "[DONE]";

/// Decode a raw SSE byte stream into provider-agnostic events.
pub fn decode_chat_completion_stream<S, B, E>(bytes: S) -> ProviderStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut events = Box::pin(bytes.eventsource());
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::Stream(e.to_string()))?;
            for mapped in map_chunk(&event.data)? {
                yield mapped;
            }
        }
    })
}

/// Map one `data:` payload to zero or more stream events.
pub fn map_chunk(data: &str) -> Result<Vec<StreamEvent>, LlmError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data == DONE_SENTINEL {
        return Ok(vec![StreamEvent::Done]);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::Deserialization(format!("invalid chunk: {e}")))?;

    if let Some(error) = chunk.error {
        return Err(LlmError::Provider {
            message: error.message,
        });
    }

    let mut events = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            events.push(StreamEvent::TextDelta { text });
        }
        if let Some(reason) = choice.finish_reason {
            let stop_reason = reason.parse().unwrap_or_else(|_| {
                debug!(finish_reason = %reason, "Unrecognized finish reason");
                StopReason::EndTurn
            });
            events.push(StreamEvent::MessageDelta { stop_reason });
        }
    }
    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(lines: &[&str]) -> Vec<Result<Vec<u8>, std::io::Error>> {
        lines
            .iter()
            .map(|line| Ok(format!("data: {line}\n\n").into_bytes()))
            .collect()
    }

    #[test]
    fn text_delta_is_extracted() {
        let events = map_chunk(r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#).unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta {
                text: "Hel".to_string()
            }]
        );
    }

    #[test]
    fn role_only_delta_yields_nothing() {
        let events = map_chunk(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn finish_reason_and_usage_are_mapped() {
        let events = map_chunk(r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#).unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::MessageDelta {
                stop_reason: StopReason::MaxTokens
            }]
        );

        let events =
            map_chunk(r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#).unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::Usage(Usage {
                input_tokens: 12,
                output_tokens: 3
            })]
        );
    }

    #[test]
    fn done_sentinel_ends_stream() {
        assert_eq!(map_chunk("[DONE]").unwrap(), vec![StreamEvent::Done]);
    }

    #[test]
    fn in_band_error_is_surfaced() {
        let err = map_chunk(r#"{"error":{"message":"model not loaded"}}"#).unwrap_err();
        assert!(matches!(err, LlmError::Provider { message } if message == "model not loaded"));
    }

    #[test]
    fn malformed_chunk_is_a_deserialization_error() {
        assert!(matches!(
            map_chunk("{not json"),
            Err(LlmError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn byte_stream_decodes_to_events() {
        let bytes = futures_util::stream::iter(sse(&[
            r#"{"choices":[{"delta":{"content":"Hi"}}]}"#,
            r#"{"choices":[{"delta":{"content":" there"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]));

        let events: Vec<StreamEvent> = decode_chat_completion_stream(bytes)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta { text: "Hi".to_string() },
                StreamEvent::TextDelta { text: " there".to_string() },
                StreamEvent::MessageDelta { stop_reason: StopReason::EndTurn },
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn event_split_across_chunks_is_reassembled() {
        let bytes = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(b"data: {\"choices\":[{\"delta\":".to_vec()),
            Ok(b"{\"content\":\"joined\"}}]}\n\n".to_vec()),
        ]);

        let events: Vec<_> = decode_chat_completion_stream(bytes).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::TextDelta { text: "joined".to_string() }
        );
    }
}
