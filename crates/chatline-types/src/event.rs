//! Topic event types for the Chatline broadcaster.
//!
//! `TopicEvent` is what every subscriber of a session topic receives.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chat::ChatMessage;

/// Name of a broadcast topic. One topic per chat session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Prefix shared by every session topic.
    pub const SESSION_PREFIX: &'static str = "chat-";

    /// Topic carrying the events of one chat session: `"chat-" + session_id`.
    pub fn for_session(session_id: &str) -> Self {
        Self(format!("{}{session_id}", Self::SESSION_PREFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events published on a session topic.
///
/// Serialized as `{ "event": "new-message", "payload": { ...message } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum TopicEvent {
    /// A message was durably stored in the session.
    #[serde(rename = "new-message")]
    NewMessage(ChatMessage),
}

impl TopicEvent {
    /// The message carried by this event.
    pub fn message(&self) -> &ChatMessage {
        match self {
            TopicEvent::NewMessage(msg) => msg,
        }
    }

    /// Wire name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            TopicEvent::NewMessage(_) => "new-message",
        }
    }
}
