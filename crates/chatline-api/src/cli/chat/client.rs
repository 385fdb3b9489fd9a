//! HTTP client for a running chat server.
//!
//! Replies and topic events both arrive as Server-Sent Events and are
//! decoded with `eventsource_stream`, the same way the providers decode
//! upstream completions.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use chatline_types::chat::{ChatMessage, ConnectionId};
use chatline_types::event::TopicEvent;

/// One event of a streamed chat reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    /// The server stored the user's message.
    UserMessage(ChatMessage),
    TextDelta(String),
    /// The reply is complete. Carries the stored message unless the client
    /// must finalize it.
    Done(Option<ChatMessage>),
    /// Generation failed after output started.
    Error(String),
}

pub type ReplyEvents = Pin<Box<dyn Stream<Item = Result<ReplyEvent>> + Send>>;
pub type TopicEvents = Pin<Box<dyn Stream<Item = Result<TopicEvent>> + Send>>;

/// Request body of `POST /api/v1/chat`.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub session_id: &'a str,
    pub message: &'a str,
    pub connection_id: &'a ConnectionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct FinalizeRequest<'a> {
    session_id: &'a str,
    connection_id: &'a ConnectionId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<&'a str>,
}

/// Response envelope as seen by a client.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct TextData {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    message: String,
}

/// Client for one chat server.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Full stored transcript of a session.
    pub async fn transcript(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/sessions/{session_id}/messages")))
            .send()
            .await
            .with_context(|| format!("cannot reach chat server at {}", self.base_url))?;
        let messages: Option<Vec<ChatMessage>> = read_envelope(response).await?;
        Ok(messages.unwrap_or_default())
    }

    /// Send a user turn and stream the reply.
    ///
    /// Failures before the first delta (validation, storage, provider) come
    /// back as an error from this call.
    pub async fn send_turn(&self, request: &ChatRequest<'_>) -> Result<ReplyEvents> {
        let response = self
            .http
            .post(self.url("/api/v1/chat"))
            .json(request)
            .send()
            .await
            .with_context(|| format!("cannot reach chat server at {}", self.base_url))?;

        if !response.status().is_success() {
            let _: Option<serde_json::Value> = read_envelope(response).await?;
            bail!("chat server returned an empty error response");
        }

        let stream: ReplyEvents = Box::pin(async_stream::try_stream! {
            let mut events = Box::pin(response.bytes_stream().eventsource());
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| anyhow::anyhow!("reply stream error: {e}"))?;
                if let Some(reply) = parse_reply_event(&event.event, &event.data)? {
                    let finished = matches!(reply, ReplyEvent::Done(_) | ReplyEvent::Error(_));
                    yield reply;
                    if finished {
                        break;
                    }
                }
            }
        });
        Ok(stream)
    }

    /// Store a reply assembled on this side (client finalize mode).
    pub async fn finalize(
        &self,
        session_id: &str,
        connection_id: &ConnectionId,
        text: &str,
        timezone: Option<&str>,
    ) -> Result<ChatMessage> {
        let response = self
            .http
            .post(self.url("/api/v1/chat/finalize"))
            .json(&FinalizeRequest {
                session_id,
                connection_id,
                text,
                timezone,
            })
            .send()
            .await
            .with_context(|| format!("cannot reach chat server at {}", self.base_url))?;
        read_envelope::<ChatMessage>(response)
            .await?
            .context("finalize response carried no message")
    }

    /// Subscribe to the session topic as `connection_id`.
    pub async fn subscribe(
        &self,
        session_id: &str,
        connection_id: &ConnectionId,
    ) -> Result<TopicEvents> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/sessions/{session_id}/events")))
            .query(&[("connection_id", connection_id.as_str())])
            .send()
            .await
            .with_context(|| format!("cannot reach chat server at {}", self.base_url))?;
        if !response.status().is_success() {
            let _: Option<serde_json::Value> = read_envelope(response).await?;
            bail!("subscription rejected");
        }

        let stream: TopicEvents = Box::pin(async_stream::try_stream! {
            let mut events = Box::pin(response.bytes_stream().eventsource());
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| anyhow::anyhow!("event stream error: {e}"))?;
                if event.data.is_empty() {
                    continue;
                }
                let topic_event: TopicEvent = serde_json::from_str(&event.data)
                    .with_context(|| format!("malformed {} event", event.event))?;
                yield topic_event;
            }
        });
        Ok(stream)
    }
}

/// Decode one SSE event of a chat reply. Unknown event names are skipped.
pub fn parse_reply_event(name: &str, data: &str) -> Result<Option<ReplyEvent>> {
    let event = match name {
        "user_message" => match decode::<MessageData>(name, data)?.message {
            Some(message) => ReplyEvent::UserMessage(message),
            None => return Ok(None),
        },
        "text_delta" => ReplyEvent::TextDelta(decode::<TextData>(name, data)?.text),
        "done" => ReplyEvent::Done(decode::<MessageData>(name, data)?.message),
        "error" => ReplyEvent::Error(decode::<ErrorData>(name, data)?.message),
        other => {
            debug!(event = other, "Skipping unknown reply event");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn decode<T: DeserializeOwned>(name: &str, data: &str) -> Result<T> {
    serde_json::from_str(data).with_context(|| format!("malformed {name} event: {data}"))
}

/// Unwrap `data` from a success envelope, or turn an error envelope into an
/// error carrying its first message.
async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>> {
    let status = response.status();
    let body = response.text().await.context("failed to read response body")?;

    match serde_json::from_str::<Envelope<T>>(&body) {
        Ok(envelope) if status.is_success() => Ok(envelope.data),
        Ok(envelope) => match envelope.errors.first() {
            Some(detail) => bail!("{} ({}, HTTP {})", detail.message, detail.code, status.as_u16()),
            None => bail!("HTTP {status}"),
        },
        Err(_) if !status.is_success() => bail!("HTTP {status}: {body}"),
        Err(err) => Err(err).context("unexpected response shape"),
    }
}
