//! Inbound chat turns: validation and plain-text extraction.

use serde::{Deserialize, Serialize};

use chatline_types::chat::{ConnectionId, ContentPart, MessageContent, Sender, TurnContent};
use chatline_types::error::ChatError;

/// One prior message supplied by the client as generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub text: String,
}

/// A user turn as received from a client.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    pub session_id: String,
    pub message: Option<MessageContent>,
    pub timezone: Option<String>,
    /// Connection that sent the turn; excluded from the resulting broadcasts.
    pub connection_id: ConnectionId,
    /// Client-side history. When absent the stored transcript is used.
    pub history: Option<Vec<HistoryEntry>>,
}

/// A turn that passed validation.
#[derive(Debug, Clone)]
pub(crate) struct ValidTurn {
    pub session_id: String,
    pub text: String,
}

/// Session ids are opaque: blank ids are rejected, anything else is used
/// byte for byte.
pub(crate) fn check_session_id(session_id: &str) -> Result<(), ChatError> {
    if session_id.trim().is_empty() {
        return Err(ChatError::InvalidRequest("session_id is required".to_string()));
    }
    Ok(())
}

/// Every publish excludes its originating connection, so one is required.
pub(crate) fn check_connection_id(connection_id: &ConnectionId) -> Result<(), ChatError> {
    if connection_id.is_blank() {
        return Err(ChatError::InvalidRequest("connection_id is required".to_string()));
    }
    Ok(())
}

/// Check the turn and extract its text. No side effects.
pub(crate) fn validate(turn: &ChatTurn) -> Result<ValidTurn, ChatError> {
    check_session_id(&turn.session_id)?;
    check_connection_id(&turn.connection_id)?;

    let content = turn
        .message
        .as_ref()
        .ok_or_else(|| ChatError::InvalidRequest("message is required".to_string()))?;
    if is_empty(content) {
        return Err(ChatError::InvalidRequest("message must not be empty".to_string()));
    }

    Ok(ValidTurn {
        session_id: turn.session_id.clone(),
        text: extract_text(content),
    })
}

/// Plain text of a turn.
///
/// A plain string is used as-is. Structured content yields its first
/// `text`-typed part, or the empty string when it has none.
pub fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => first_text_part(parts),
        MessageContent::Turn(turn) => match &turn.content {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Parts(parts) => first_text_part(parts),
        },
    }
}

fn first_text_part(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .find(|part| part.kind == "text")
        .and_then(|part| part.text.clone())
        .unwrap_or_default()
}

fn is_empty(content: &MessageContent) -> bool {
    match content {
        MessageContent::Text(text) => text.trim().is_empty(),
        MessageContent::Parts(parts) => parts.is_empty(),
        MessageContent::Turn(turn) => match &turn.content {
            TurnContent::Text(text) => text.trim().is_empty(),
            TurnContent::Parts(parts) => parts.is_empty(),
        },
    }
}
