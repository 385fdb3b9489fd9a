//! Chat message types for Chatline.
//!
//! A session has no record of its own: it is the set of messages sharing a
//! client-generated `session_id`. Any two clients using the same string share
//! one transcript, with no ownership or access check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Who authored a message.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (sender IN ('user', 'assistant'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Sender::User),
            "assistant" => Ok(Sender::Assistant),
            other => Err(format!("invalid sender: '{other}'")),
        }
    }
}

/// A persisted message within a chat session.
///
/// `id` and `timestamp` are assigned by the message store. Messages are
/// ordered by `timestamp`, ties broken by store insertion order. The text of
/// an assistant message is written exactly once, when its stream finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: String,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Client-reported timezone. Informational only, never used for ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Input to `MessageStore::append`: everything except the store-assigned
/// `id` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub session_id: String,
    pub sender: Sender,
    pub text: String,
    pub timezone: Option<String>,
}

impl NewMessage {
    /// A message typed by the visitor.
    pub fn user(session_id: impl Into<String>, text: impl Into<String>, timezone: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            sender: Sender::User,
            text: text.into(),
            timezone,
        }
    }

    /// A finalized assistant reply.
    pub fn assistant(
        session_id: impl Into<String>,
        text: impl Into<String>,
        timezone: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            sender: Sender::Assistant,
            text: text.into(),
            timezone,
        }
    }
}

/// Identity of a single live client connection (one browser tab, one
/// admin viewer). Generated by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty or whitespace-only ids identify no connection.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The content of an inbound chat turn.
///
/// Clients send either a plain string, a list of typed parts, or a
/// `{ role, content }` turn object whose content is itself a string or parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Turn(StructuredTurn),
}

/// One typed part of a structured turn (`{"type": "text", "text": "..."}`).
///
/// Non-text parts (images, files) carry no `text` and are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A `{ role, content }` turn object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub content: TurnContent,
}

/// Content of a [`StructuredTurn`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}
