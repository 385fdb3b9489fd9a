//! Client-side transcript reconciliation.
//!
//! A `Reconciler` owns one client's view of one session and merges three
//! timelines into it: the user's optimistic input, the live token stream of
//! the reply it triggered, and `new-message` events from other connections.
//! The transcript is ordered and never holds two entries with the same id.
//!
//! The four `apply_*` methods are its only mutators.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use chatline_types::chat::{ChatMessage, Sender};
use chatline_types::error::ChatError;
use chatline_types::event::TopicEvent;

/// Lifecycle of a local transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Shown locally, not yet confirmed by the store.
    Optimistic,
    /// Assistant reply still receiving deltas.
    Streaming,
    /// Mirrors a stored message.
    Final,
}

/// One row of the local transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// Store id once final, locally generated placeholder before that.
    pub id: Uuid,
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub state: EntryState,
}

impl TranscriptEntry {
    fn from_message(message: &ChatMessage) -> Self {
        Self {
            id: message.id,
            sender: message.sender,
            text: message.text.clone(),
            timestamp: message.timestamp,
            state: EntryState::Final,
        }
    }
}

/// How the generation behind a placeholder ended.
#[derive(Debug, Clone)]
pub enum Finalization {
    /// The store holds the message; its id and text are authoritative.
    Persisted(ChatMessage),
    /// Nothing was stored; the placeholder must disappear.
    Failed,
}

/// Effect of a mutation on the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new entry was inserted at its chronological position.
    Inserted,
    /// An existing entry was overwritten with authoritative content.
    Updated,
    /// A placeholder took on its stored id and text.
    Confirmed,
    /// A placeholder was removed.
    Removed,
    /// The event could not be placed consistently and was appended at the end.
    AppendedOutOfOrder,
    /// The event did not concern this transcript.
    Ignored,
}

/// Ordered, id-deduplicated transcript of one session as seen by one client.
#[derive(Debug, Clone)]
pub struct Reconciler {
    session_id: String,
    entries: Vec<TranscriptEntry>,
    /// Timestamp of the newest message in the seeding snapshot.
    horizon: Option<DateTime<Utc>>,
    /// Placeholder id of the reply currently streaming, if any.
    streaming: Option<Uuid>,
}

impl Reconciler {
    /// Build a transcript from a `list_by_session` snapshot taken at connect time.
    pub fn from_seed(session_id: impl Into<String>, seed: Vec<ChatMessage>) -> Self {
        let session_id = session_id.into();
        let mut entries: Vec<TranscriptEntry> = Vec::with_capacity(seed.len());
        for message in seed.iter().filter(|m| m.session_id == session_id) {
            if entries.iter().any(|e| e.id == message.id) {
                continue;
            }
            entries.push(TranscriptEntry::from_message(message));
        }
        // Stable: equal timestamps keep store order.
        entries.sort_by_key(|e| e.timestamp);
        let horizon = entries.last().map(|e| e.timestamp);

        Self {
            session_id,
            entries,
            horizon,
            streaming: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Placeholder id of the in-progress assistant reply.
    pub fn streaming_placeholder(&self) -> Option<Uuid> {
        self.streaming
    }

    /// Show the user's own message immediately. Returns its placeholder id.
    pub fn apply_optimistic(&mut self, text: impl Into<String>) -> Uuid {
        let id = Uuid::now_v7();
        self.entries.push(TranscriptEntry {
            id,
            sender: Sender::User,
            text: text.into(),
            timestamp: Utc::now(),
            state: EntryState::Optimistic,
        });
        id
    }

    /// Append a delta to the in-progress assistant entry, creating it on the
    /// first delta. Returns the placeholder id, stable for the whole stream.
    pub fn apply_stream_delta(&mut self, delta: &str) -> Uuid {
        if let Some(id) = self.streaming
            && let Some(entry) = self.entries.iter_mut().find(|e| e.id == id)
        {
            entry.text.push_str(delta);
            return id;
        }

        let id = Uuid::now_v7();
        self.entries.push(TranscriptEntry {
            id,
            sender: Sender::Assistant,
            text: delta.to_string(),
            timestamp: Utc::now(),
            state: EntryState::Streaming,
        });
        self.streaming = Some(id);
        id
    }

    /// Settle a placeholder once the store has answered.
    ///
    /// `Persisted` swaps the placeholder's id and text for the stored ones.
    /// If the stored id is already present (delivered by broadcast first),
    /// the placeholder is dropped and the existing entry overwritten.
    /// `Failed` removes the placeholder so no partial text remains.
    pub fn apply_finalize(&mut self, placeholder: Uuid, outcome: Finalization) -> MergeOutcome {
        if self.streaming == Some(placeholder) {
            self.streaming = None;
        }

        let message = match outcome {
            Finalization::Failed => return self.remove_placeholder(placeholder),
            Finalization::Persisted(message) => message,
        };

        if message.session_id != self.session_id {
            debug!(
                session_id = %self.session_id,
                other_session = %message.session_id,
                "Ignoring finalization for another session"
            );
            return MergeOutcome::Ignored;
        }

        if message.id != placeholder && self.position(message.id).is_some() {
            self.remove_placeholder(placeholder);
            self.overwrite(&message);
            return MergeOutcome::Updated;
        }

        match self.position(placeholder) {
            Some(index) => {
                self.entries[index] = TranscriptEntry::from_message(&message);
                MergeOutcome::Confirmed
            }
            None => self.insert_chronologically(&message),
        }
    }

    /// Merge a `new-message` event published by another connection.
    ///
    /// A known id is overwritten in place, so replaying an event is a no-op.
    /// An unknown message is inserted at its chronological position, unless it
    /// predates the seed snapshot: such a message should have been part of
    /// the snapshot, so it is appended at the end and logged instead.
    pub fn apply_broadcast(&mut self, event: &TopicEvent) -> MergeOutcome {
        let message = event.message();
        if message.session_id != self.session_id {
            return MergeOutcome::Ignored;
        }

        if self.position(message.id).is_some() {
            self.overwrite(message);
            return MergeOutcome::Updated;
        }

        if self.horizon.is_some_and(|horizon| message.timestamp < horizon) {
            let err = ChatError::ReconciliationMismatch {
                message_id: message.id,
            };
            warn!(session_id = %self.session_id, error = %err, "Appending out-of-order message");
            self.entries.push(TranscriptEntry::from_message(message));
            return MergeOutcome::AppendedOutOfOrder;
        }

        self.insert_chronologically(message)
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn overwrite(&mut self, message: &ChatMessage) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == message.id) {
            entry.text.clone_from(&message.text);
            entry.state = EntryState::Final;
        }
    }

    fn remove_placeholder(&mut self, placeholder: Uuid) -> MergeOutcome {
        match self.position(placeholder) {
            Some(index) if self.entries[index].state != EntryState::Final => {
                self.entries.remove(index);
                MergeOutcome::Removed
            }
            _ => MergeOutcome::Ignored,
        }
    }

    fn insert_chronologically(&mut self, message: &ChatMessage) -> MergeOutcome {
        let index = self
            .entries
            .iter()
            .position(|e| e.timestamp > message.timestamp)
            .unwrap_or(self.entries.len());
        self.entries
            .insert(index, TranscriptEntry::from_message(message));
        MergeOutcome::Inserted
    }
}
