//! Broadcaster trait definition.

use chatline_types::chat::ConnectionId;
use chatline_types::error::BroadcastError;
use chatline_types::event::{Topic, TopicEvent};

use super::hub::Subscription;

/// A topic event together with the connection it must not be delivered to.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: TopicEvent,
    pub exclude: Option<ConnectionId>,
}

/// Publish/subscribe fabric delivering topic events to live connections.
///
/// Publishing is best-effort from the caller's point of view: the session
/// coordinator never rolls back or retries a store write because a publish
/// failed.
pub trait Broadcaster: Send + Sync {
    /// Deliver `event` to every subscriber of `topic` except `exclude`.
    ///
    /// Returns the number of receivers the envelope was handed to. A topic
    /// with no subscribers is not an error.
    fn publish(
        &self,
        topic: &Topic,
        event: TopicEvent,
        exclude: Option<&ConnectionId>,
    ) -> impl std::future::Future<Output = Result<usize, BroadcastError>> + Send;

    /// Subscribe `connection` to `topic`. Only events published after this
    /// call are observed.
    fn subscribe(
        &self,
        topic: &Topic,
        connection: ConnectionId,
    ) -> Result<Subscription, BroadcastError>;
}
