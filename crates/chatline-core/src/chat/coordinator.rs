//! Session coordinator: the server-side orchestration of one chat turn.
//!
//! For each inbound turn the coordinator persists the user's message,
//! announces it to the other connections on the session topic, streams the
//! generated reply back to the caller only, and finally persists and
//! announces the assistant message. Broadcasts are fire-and-forget; the
//! store writes that later steps depend on are awaited.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use chatline_types::chat::{ChatMessage, ConnectionId, NewMessage};
use chatline_types::config::{FinalizeMode, PolicyConfig, StoragePolicy};
use chatline_types::error::ChatError;
use chatline_types::event::{Topic, TopicEvent};
use chatline_types::llm::{Message, MessageRole};

use crate::broadcast::Broadcaster;
use crate::llm::streamer::{CompletionStreamer, DeltaStream};
use crate::repository::MessageStore;

use super::best_effort::spawn_best_effort;
use super::turn::{self, ChatTurn, HistoryEntry, ValidTurn};

/// Item of the reply stream sent back to the requesting connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// Incremental assistant text.
    Delta(String),
    /// Generation completed. Carries the stored assistant message when the
    /// server finalized it, `None` when the client must call finalize.
    Finished(Option<ChatMessage>),
}

/// Point-to-point reply stream. Ends after `Finished` or a single error.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<ReplyEvent, ChatError>> + Send + 'static>>;

/// Outcome of accepting a user turn.
pub struct TurnReply {
    /// The stored user message; `None` when a fail-open append failed.
    pub user_message: Option<ChatMessage>,
    pub events: ReplyStream,
}

impl std::fmt::Debug for TurnReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnReply")
            .field("user_message", &self.user_message)
            .finish_non_exhaustive()
    }
}

/// Orchestrates store, broadcaster, and completion streamer for chat turns.
///
/// Holds no per-session state: invocations run concurrently across and
/// within sessions, ordered only by the store's append order.
pub struct SessionCoordinator<S, B> {
    store: Arc<S>,
    broadcaster: Arc<B>,
    streamer: CompletionStreamer,
    system_prompt: Option<String>,
    policy: PolicyConfig,
}

impl<S, B> SessionCoordinator<S, B>
where
    S: MessageStore + 'static,
    B: Broadcaster + 'static,
{
    pub fn new(store: Arc<S>, broadcaster: Arc<B>, streamer: CompletionStreamer) -> Self {
        Self {
            store,
            broadcaster,
            streamer,
            system_prompt: None,
            policy: PolicyConfig::default(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> PolicyConfig {
        self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<B> {
        &self.broadcaster
    }

    /// Accept a user turn and start generating the reply.
    ///
    /// Validation failures return `InvalidRequest` before any side effect.
    /// Under the fail-closed storage policy a failed user append returns
    /// `StorageUnavailable` before generation starts; under fail-open it is
    /// logged and the turn proceeds without a stored user message.
    #[tracing::instrument(
        skip_all,
        fields(session_id = %turn.session_id, connection_id = %turn.connection_id)
    )]
    pub async fn handle_user_turn(&self, turn: ChatTurn) -> Result<TurnReply, ChatError> {
        let valid = turn::validate(&turn)?;

        let new_message = NewMessage::user(&valid.session_id, &valid.text, turn.timezone.clone());
        let user_message = match self.store.append(&new_message).await {
            Ok(stored) => {
                info!(message_id = %stored.id, "Persisted user message");
                publish_best_effort(
                    Arc::clone(&self.broadcaster),
                    stored.clone(),
                    turn.connection_id.clone(),
                );
                Some(stored)
            }
            Err(err) => match self.policy.user_message_storage {
                StoragePolicy::FailOpen => {
                    warn!(error = %err, "Failed to persist user message, continuing without it");
                    None
                }
                StoragePolicy::FailClosed => {
                    warn!(error = %err, "Failed to persist user message, rejecting turn");
                    return Err(err.into());
                }
            },
        };

        let history = self.build_history(&valid, turn.history).await;
        let deltas = self.streamer.stream(history, self.system_prompt.clone());
        let events = self.reply_stream(
            deltas,
            valid.session_id,
            turn.timezone,
            turn.connection_id,
        );

        Ok(TurnReply {
            user_message,
            events,
        })
    }

    /// Persist a completed assistant reply and announce it to the session.
    ///
    /// A store failure is returned to the caller and nothing is broadcast.
    pub async fn finalize_assistant(
        &self,
        session_id: &str,
        text: impl Into<String>,
        timezone: Option<String>,
        connection_id: &ConnectionId,
    ) -> Result<ChatMessage, ChatError> {
        turn::check_session_id(session_id)?;
        turn::check_connection_id(connection_id)?;

        persist_and_publish(
            Arc::clone(&self.store),
            Arc::clone(&self.broadcaster),
            NewMessage::assistant(session_id, text, timezone),
            connection_id.clone(),
        )
        .await
    }

    /// Full ordered transcript of a session. Unknown sessions are empty.
    pub async fn transcript(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        turn::check_session_id(session_id)?;
        Ok(self.store.list_by_session(session_id).await?)
    }

    /// Generation context: client history if supplied, otherwise the stored
    /// transcript, always ending with the current turn.
    async fn build_history(
        &self,
        turn: &ValidTurn,
        supplied: Option<Vec<HistoryEntry>>,
    ) -> Vec<Message> {
        let mut history: Vec<Message> = match supplied {
            Some(entries) => entries
                .into_iter()
                .map(|entry| Message::new(entry.sender.into(), entry.text))
                .collect(),
            None => match self.store.list_by_session(&turn.session_id).await {
                Ok(messages) => messages
                    .into_iter()
                    .map(|m| Message::new(m.sender.into(), m.text))
                    .collect(),
                Err(err) => {
                    warn!(error = %err, "Failed to load session history, using current turn only");
                    Vec::new()
                }
            },
        };

        let ends_with_turn = history
            .last()
            .is_some_and(|m| m.role == MessageRole::User && m.content == turn.text);
        if !ends_with_turn {
            history.push(Message::new(MessageRole::User, turn.text.clone()));
        }
        history
    }

    fn reply_stream(
        &self,
        mut deltas: DeltaStream,
        session_id: String,
        timezone: Option<String>,
        connection_id: ConnectionId,
    ) -> ReplyStream {
        let store = Arc::clone(&self.store);
        let broadcaster = Arc::clone(&self.broadcaster);
        let mode = self.policy.finalize;

        Box::pin(async_stream::stream! {
            let mut text = String::new();
            let mut failed = false;

            while let Some(item) = deltas.next().await {
                match item {
                    Ok(delta) => {
                        text.push_str(&delta);
                        yield Ok(ReplyEvent::Delta(delta));
                    }
                    Err(err) => {
                        failed = true;
                        yield Err(err);
                        break;
                    }
                }
            }

            if !failed {
                match mode {
                    FinalizeMode::Client => yield Ok(ReplyEvent::Finished(None)),
                    FinalizeMode::Server => {
                        // Detached so a client hanging up now cannot abort the write.
                        let finalize = tokio::spawn(persist_and_publish(
                            store,
                            broadcaster,
                            NewMessage::assistant(session_id, text, timezone),
                            connection_id,
                        ));
                        match finalize.await {
                            Ok(Ok(stored)) => yield Ok(ReplyEvent::Finished(Some(stored))),
                            Ok(Err(err)) => yield Err(err),
                            Err(join_err) => {
                                yield Err(ChatError::StorageUnavailable(join_err.to_string()));
                            }
                        }
                    }
                }
            }
        })
    }
}

impl<S, B> std::fmt::Debug for SessionCoordinator<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("streamer", &self.streamer)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

async fn persist_and_publish<S, B>(
    store: Arc<S>,
    broadcaster: Arc<B>,
    message: NewMessage,
    exclude: ConnectionId,
) -> Result<ChatMessage, ChatError>
where
    S: MessageStore + 'static,
    B: Broadcaster + 'static,
{
    let stored = store.append(&message).await.map_err(|err| {
        warn!(session_id = %message.session_id, error = %err, "Failed to persist assistant message");
        ChatError::from(err)
    })?;
    info!(
        session_id = %stored.session_id,
        message_id = %stored.id,
        "Persisted assistant message"
    );

    publish_best_effort(broadcaster, stored.clone(), exclude);
    Ok(stored)
}

fn publish_best_effort<B>(
    broadcaster: Arc<B>,
    message: ChatMessage,
    exclude: ConnectionId,
) -> JoinHandle<()>
where
    B: Broadcaster + 'static,
{
    let topic = Topic::for_session(&message.session_id);
    spawn_best_effort("publish", async move {
        broadcaster
            .publish(&topic, TopicEvent::NewMessage(message), Some(&exclude))
            .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chatline_types::chat::{MessageContent, Sender};
    use uuid::Uuid;

    use crate::broadcast::{Subscription, TopicHub};
    use crate::chat::reconcile::{Finalization, MergeOutcome, Reconciler};
    use crate::testing::{MemoryStore, ScriptedProvider, Step};

    struct Harness {
        store: Arc<MemoryStore>,
        hub: Arc<TopicHub>,
        provider: Arc<ScriptedProvider>,
        coordinator: SessionCoordinator<MemoryStore, TopicHub>,
    }

    fn harness(store: MemoryStore, provider: ScriptedProvider, policy: PolicyConfig) -> Harness {
        let store = Arc::new(store);
        let hub = Arc::new(TopicHub::new(32));
        let provider = Arc::new(provider);
        let streamer = CompletionStreamer::new(provider.clone(), "test-model")
            .with_idle_timeout(Duration::from_millis(200));
        let coordinator = SessionCoordinator::new(Arc::clone(&store), Arc::clone(&hub), streamer)
            .with_system_prompt("You are helpful.")
            .with_policy(policy);
        Harness {
            store,
            hub,
            provider,
            coordinator,
        }
    }

    fn turn(session_id: &str, text: &str, connection: &str) -> ChatTurn {
        ChatTurn {
            session_id: session_id.to_string(),
            message: Some(MessageContent::Text(text.to_string())),
            timezone: Some("Europe/Berlin".to_string()),
            connection_id: ConnectionId::new(connection),
            history: None,
        }
    }

    fn subscribe(hub: &TopicHub, session_id: &str, connection: &str) -> Subscription {
        hub.subscribe(&Topic::for_session(session_id), ConnectionId::new(connection))
            .unwrap()
    }

    async fn next_event(sub: &mut Subscription) -> Option<TopicEvent> {
        tokio::time::timeout(Duration::from_millis(150), sub.recv())
            .await
            .ok()
            .flatten()
    }

    async fn drain(events: ReplyStream) -> Vec<Result<ReplyEvent, ChatError>> {
        events.collect().await
    }

    fn delta_text(items: &[Result<ReplyEvent, ChatError>]) -> String {
        items
            .iter()
            .filter_map(|item| match item {
                Ok(ReplyEvent::Delta(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn user_message_is_stored_and_published_without_echo() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["Hi"]),
            PolicyConfig::default(),
        );
        let mut sender = subscribe(&h.hub, "s1", "tab-a");
        let mut other = subscribe(&h.hub, "s1", "tab-b");

        let reply = h.coordinator.handle_user_turn(turn("s1", "hello", "tab-a")).await.unwrap();
        let user = reply.user_message.clone().unwrap();
        assert_eq!(user.text, "hello");
        assert_eq!(user.sender, Sender::User);
        assert_eq!(user.timezone.as_deref(), Some("Europe/Berlin"));

        let stored = h.store.list_by_session("s1").await.unwrap();
        assert_eq!(stored, vec![user.clone()]);

        let event = next_event(&mut other).await.unwrap();
        assert_eq!(event.message(), &user);
        assert!(next_event(&mut sender).await.is_none());
        drop(reply);
    }

    #[tokio::test]
    async fn streamed_text_equals_persisted_assistant_text() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["Hi", " there", "!"]),
            PolicyConfig::default(),
        );
        let mut other = subscribe(&h.hub, "s1", "tab-b");

        let reply = h.coordinator.handle_user_turn(turn("s1", "hello", "tab-a")).await.unwrap();
        let items = drain(reply.events).await;

        let streamed = delta_text(&items);
        let finished = match items.last() {
            Some(Ok(ReplyEvent::Finished(Some(message)))) => message.clone(),
            other => panic!("expected server finalization, got {other:?}"),
        };
        assert_eq!(streamed, "Hi there!");
        assert_eq!(finished.text, streamed);
        assert_eq!(finished.sender, Sender::Assistant);

        let stored = h.store.list_by_session("s1").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1], finished);

        let first = next_event(&mut other).await.unwrap();
        let second = next_event(&mut other).await.unwrap();
        assert_eq!(first.message().sender, Sender::User);
        assert_eq!(second.message(), &finished);
    }

    #[tokio::test]
    async fn failed_generation_commits_nothing() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::new(vec![Step::Delta("Hi"), Step::Delta(" there"), Step::Fail]),
            PolicyConfig::default(),
        );
        let mut other = subscribe(&h.hub, "s1", "tab-b");

        let reply = h.coordinator.handle_user_turn(turn("s1", "hello", "tab-a")).await.unwrap();
        let items = drain(reply.events).await;

        assert_eq!(delta_text(&items), "Hi there");
        assert!(matches!(items.last(), Some(Err(ChatError::GenerationFailed(_)))));

        let stored = h.store.list_by_session("s1").await.unwrap();
        assert!(stored.iter().all(|m| m.sender == Sender::User));
        assert_eq!(stored.len(), 1);

        assert_eq!(next_event(&mut other).await.unwrap().message().sender, Sender::User);
        assert!(next_event(&mut other).await.is_none());
    }

    #[tokio::test]
    async fn fail_open_continues_without_user_message() {
        let store = MemoryStore::new();
        store.fail_appends_for(Sender::User);
        let h = harness(store, ScriptedProvider::replying(&["ok"]), PolicyConfig::default());
        let mut other = subscribe(&h.hub, "s1", "tab-b");

        let reply = h.coordinator.handle_user_turn(turn("s1", "hello", "tab-a")).await.unwrap();
        assert!(reply.user_message.is_none());
        let items = drain(reply.events).await;
        assert!(matches!(items.last(), Some(Ok(ReplyEvent::Finished(Some(_))))));

        let requests = h.provider.requests();
        assert_eq!(requests[0].messages.last().unwrap().content, "hello");

        let event = next_event(&mut other).await.unwrap();
        assert_eq!(event.message().sender, Sender::Assistant);
    }

    #[tokio::test]
    async fn fail_closed_rejects_before_generation() {
        let store = MemoryStore::new();
        store.fail_appends_for(Sender::User);
        let policy = PolicyConfig {
            user_message_storage: StoragePolicy::FailClosed,
            ..Default::default()
        };
        let h = harness(store, ScriptedProvider::replying(&["ok"]), policy);

        let err = h
            .coordinator
            .handle_user_turn(turn("s1", "hello", "tab-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::StorageUnavailable(_)));
        assert!(h.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn invalid_turn_has_no_side_effects() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["ok"]),
            PolicyConfig::default(),
        );
        let mut other = subscribe(&h.hub, "", "tab-b");

        let err = h.coordinator.handle_user_turn(turn("", "hello", "tab-a")).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));

        let err = h.coordinator.handle_user_turn(turn("s1", "", "tab-a")).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));

        assert!(h.store.all().is_empty());
        assert!(h.provider.requests().is_empty());
        assert!(next_event(&mut other).await.is_none());
    }

    #[tokio::test]
    async fn turn_without_connection_is_rejected_before_publishing() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["ok"]),
            PolicyConfig::default(),
        );
        let mut sender = subscribe(&h.hub, "s1", "tab-a");

        let mut t = turn("s1", "hello", "tab-a");
        t.connection_id = ConnectionId::default();
        let err = h.coordinator.handle_user_turn(t).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));

        let err = h
            .coordinator
            .finalize_assistant("s1", "reply", None, &ConnectionId::new(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));

        assert!(h.store.all().is_empty());
        assert!(next_event(&mut sender).await.is_none());
    }

    #[tokio::test]
    async fn padded_session_id_is_a_distinct_session() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["ok"]),
            PolicyConfig::default(),
        );
        let mut padded_viewer = subscribe(&h.hub, " s1", "viewer");
        let mut plain_viewer = subscribe(&h.hub, "s1", "viewer-2");

        let reply = h.coordinator.handle_user_turn(turn(" s1", "hello", "tab-a")).await.unwrap();
        let _ = drain(reply.events).await;

        let event = next_event(&mut padded_viewer).await.unwrap();
        assert_eq!(event.message().session_id, " s1");
        assert!(next_event(&mut plain_viewer).await.is_none());

        assert!(h.store.all().iter().all(|m| m.session_id == " s1"));
        assert_eq!(h.coordinator.transcript(" s1").await.unwrap().len(), 2);
        assert!(h.coordinator.transcript("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_mid_stream_commits_nothing() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::new(vec![Step::Delta("Hi"), Step::Stall]),
            PolicyConfig::default(),
        );
        let mut other = subscribe(&h.hub, "s1", "tab-b");

        let mut reply = h.coordinator.handle_user_turn(turn("s1", "hello", "tab-a")).await.unwrap();
        let first = reply.events.next().await.unwrap().unwrap();
        assert_eq!(first, ReplyEvent::Delta("Hi".to_string()));
        drop(reply.events);

        // Outlast the idle timeout so a surviving stream would have finished.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stored = h.store.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, Sender::User);

        assert_eq!(next_event(&mut other).await.unwrap().message().sender, Sender::User);
        assert!(next_event(&mut other).await.is_none());
    }

    #[tokio::test]
    async fn history_comes_from_store_and_ends_with_turn() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["ok"]),
            PolicyConfig::default(),
        );
        h.store.append(&NewMessage::user("s1", "earlier", None)).await.unwrap();
        h.store
            .append(&NewMessage::assistant("s1", "earlier reply", None))
            .await
            .unwrap();

        let reply = h.coordinator.handle_user_turn(turn("s1", "now", "tab-a")).await.unwrap();
        let _ = drain(reply.events).await;

        let request = &h.provider.requests()[0];
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["earlier", "earlier reply", "now"]);
        assert_eq!(request.system.as_deref(), Some("You are helpful."));
    }

    #[tokio::test]
    async fn supplied_history_takes_precedence() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["ok"]),
            PolicyConfig::default(),
        );
        let mut t = turn("s1", "now", "tab-a");
        t.history = Some(vec![HistoryEntry {
            sender: Sender::Assistant,
            text: "Welcome!".to_string(),
        }]);

        let reply = h.coordinator.handle_user_turn(t).await.unwrap();
        let _ = drain(reply.events).await;

        let request = &h.provider.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, MessageRole::Assistant);
        assert_eq!(request.messages[1].content, "now");
    }

    #[tokio::test]
    async fn client_mode_defers_persistence_to_finalize() {
        let policy = PolicyConfig {
            finalize: FinalizeMode::Client,
            ..Default::default()
        };
        let h = harness(MemoryStore::new(), ScriptedProvider::replying(&["Hi there!"]), policy);
        let mut sender = subscribe(&h.hub, "s1", "tab-a");
        let mut other = subscribe(&h.hub, "s1", "tab-b");

        let reply = h.coordinator.handle_user_turn(turn("s1", "hello", "tab-a")).await.unwrap();
        let items = drain(reply.events).await;
        assert_eq!(items.last().unwrap().as_ref().unwrap(), &ReplyEvent::Finished(None));
        assert_eq!(h.store.all().len(), 1);

        let stored = h
            .coordinator
            .finalize_assistant("s1", delta_text(&items), None, &ConnectionId::new("tab-a"))
            .await
            .unwrap();
        assert_eq!(stored.text, "Hi there!");
        assert_eq!(h.store.all().len(), 2);

        assert_eq!(next_event(&mut other).await.unwrap().message().sender, Sender::User);
        assert_eq!(next_event(&mut other).await.unwrap().message(), &stored);
        assert!(next_event(&mut sender).await.is_none());
    }

    #[tokio::test]
    async fn finalization_failure_is_surfaced_and_not_broadcast() {
        let store = MemoryStore::new();
        store.fail_appends_for(Sender::Assistant);
        let h = harness(store, ScriptedProvider::replying(&["Hi"]), PolicyConfig::default());
        let mut other = subscribe(&h.hub, "s1", "tab-b");

        let reply = h.coordinator.handle_user_turn(turn("s1", "hello", "tab-a")).await.unwrap();
        let items = drain(reply.events).await;
        assert!(matches!(items.last(), Some(Err(ChatError::StorageUnavailable(_)))));

        assert_eq!(next_event(&mut other).await.unwrap().message().sender, Sender::User);
        assert!(next_event(&mut other).await.is_none());
    }

    #[tokio::test]
    async fn transcript_of_unknown_session_is_empty() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["ok"]),
            PolicyConfig::default(),
        );
        assert!(h.coordinator.transcript("nobody").await.unwrap().is_empty());
        assert!(matches!(
            h.coordinator.transcript(" ").await,
            Err(ChatError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn two_tabs_converge_on_the_same_transcript() {
        let h = harness(
            MemoryStore::new(),
            ScriptedProvider::replying(&["Hi", " there!"]),
            PolicyConfig::default(),
        );
        let seed = h.store.list_by_session("s1").await.unwrap();
        let mut tab_a = Reconciler::from_seed("s1", seed.clone());
        let mut tab_b = Reconciler::from_seed("s1", seed);
        let mut sub_a = subscribe(&h.hub, "s1", "tab-a");
        let mut sub_b = subscribe(&h.hub, "s1", "tab-b");

        let user_placeholder = tab_a.apply_optimistic("hello");
        let reply = h.coordinator.handle_user_turn(turn("s1", "hello", "tab-a")).await.unwrap();
        let user = reply.user_message.clone().unwrap();
        tab_a.apply_finalize(user_placeholder, Finalization::Persisted(user));

        let mut events = reply.events;
        let mut reply_placeholder = None;
        while let Some(item) = events.next().await {
            match item.unwrap() {
                ReplyEvent::Delta(delta) => reply_placeholder = Some(tab_a.apply_stream_delta(&delta)),
                ReplyEvent::Finished(Some(stored)) => {
                    tab_a.apply_finalize(reply_placeholder.unwrap(), Finalization::Persisted(stored));
                }
                ReplyEvent::Finished(None) => panic!("server mode must finalize"),
            }
        }

        let mut received = 0;
        while let Some(event) = next_event(&mut sub_b).await {
            assert_eq!(tab_b.apply_broadcast(&event), MergeOutcome::Inserted);
            received += 1;
        }
        assert_eq!(received, 2);
        assert!(next_event(&mut sub_a).await.is_none());

        let view = |r: &Reconciler| -> Vec<(Uuid, String)> {
            r.entries().iter().map(|e| (e.id, e.text.clone())).collect()
        };
        assert_eq!(view(&tab_a), view(&tab_b));
        assert_eq!(view(&tab_a)[1].1, "Hi there!");

        let stored: Vec<Uuid> = h.store.all().iter().map(|m| m.id).collect();
        let local: Vec<Uuid> = tab_b.entries().iter().map(|e| e.id).collect();
        assert_eq!(stored, local);
    }
}
