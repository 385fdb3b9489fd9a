//! In-memory fakes shared by the core unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use uuid::Uuid;

use chatline_types::chat::{ChatMessage, NewMessage, Sender};
use chatline_types::error::StoreError;
use chatline_types::llm::{CompletionRequest, LlmError, StreamEvent};

use crate::llm::provider::{LlmProvider, ProviderStream};
use crate::repository::MessageStore;

/// Vec-backed store. Insertion order doubles as the timestamp tiebreak.
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<ChatMessage>>,
    fail_user: AtomicBool,
    fail_assistant: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make appends of the given sender fail with a connection error.
    pub fn fail_appends_for(&self, sender: Sender) {
        match sender {
            Sender::User => self.fail_user.store(true, Ordering::SeqCst),
            Sender::Assistant => self.fail_assistant.store(true, Ordering::SeqCst),
        }
    }

    /// Make every operation fail.
    pub fn offline() -> Self {
        let store = Self::new();
        store.fail_user.store(true, Ordering::SeqCst);
        store.fail_assistant.store(true, Ordering::SeqCst);
        store
    }

    pub fn all(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }

    fn is_offline(&self) -> bool {
        self.fail_user.load(Ordering::SeqCst) && self.fail_assistant.load(Ordering::SeqCst)
    }
}

impl MessageStore for MemoryStore {
    async fn append(&self, message: &NewMessage) -> Result<ChatMessage, StoreError> {
        let failing = match message.sender {
            Sender::User => self.fail_user.load(Ordering::SeqCst),
            Sender::Assistant => self.fail_assistant.load(Ordering::SeqCst),
        };
        if failing {
            return Err(StoreError::Connection("store offline".to_string()));
        }

        let stored = ChatMessage {
            id: Uuid::now_v7(),
            session_id: message.session_id.clone(),
            sender: message.sender,
            text: message.text.clone(),
            timestamp: Utc::now(),
            timezone: message.timezone.clone(),
        };
        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn list_by_session(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        if self.is_offline() {
            return Err(StoreError::Connection("store offline".to_string()));
        }
        let mut messages: Vec<ChatMessage> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    async fn count_by_session(&self, session_id: &str) -> Result<u64, StoreError> {
        Ok(self.list_by_session(session_id).await?.len() as u64)
    }
}

/// One scripted provider action.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Delta(&'static str),
    Done,
    Fail,
    /// Never yield again.
    Stall,
}

/// Provider that replays a fixed script and records every request.
pub struct ScriptedProvider {
    steps: Vec<Step>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Deltas for each piece of text followed by `Done`.
    pub fn replying(deltas: &[&'static str]) -> Self {
        let mut steps: Vec<Step> = deltas.iter().map(|d| Step::Delta(*d)).collect();
        steps.push(Step::Done);
        Self::new(steps)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn stream(&self, request: CompletionRequest) -> ProviderStream {
        self.requests.lock().unwrap().push(request);
        let steps = self.steps.clone();
        Box::pin(async_stream::stream! {
            yield Ok(StreamEvent::Connected);
            for step in steps {
                match step {
                    Step::Delta(text) => yield Ok(StreamEvent::TextDelta { text: text.to_string() }),
                    Step::Done => yield Ok(StreamEvent::Done),
                    Step::Fail => yield Err(LlmError::Provider { message: "upstream exploded".to_string() }),
                    Step::Stall => std::future::pending::<()>().await,
                }
            }
        })
    }
}
