//! In-process topic hub built on `tokio::sync::broadcast`.
//!
//! Channels are created lazily on first subscribe and pruned once their last
//! subscriber goes away, so idle sessions hold no memory.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use chatline_types::chat::ConnectionId;
use chatline_types::error::BroadcastError;
use chatline_types::event::{Topic, TopicEvent};

use super::broadcaster::{Broadcaster, Envelope};

type TopicMap = DashMap<Topic, broadcast::Sender<Envelope>>;

/// Multi-topic broadcaster for session events.
///
/// Cloning the hub shares the underlying topic map.
#[derive(Clone)]
pub struct TopicHub {
    topics: Arc<TopicMap>,
    capacity: usize,
}

impl TopicHub {
    /// Create a hub whose per-topic channels buffer `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of topics that currently have a live channel.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn send(&self, topic: &Topic, envelope: Envelope) -> usize {
        let Some(sender) = self.topics.get(topic).map(|tx| tx.clone()) else {
            return 0;
        };

        match sender.send(envelope) {
            Ok(delivered) => delivered,
            Err(_) => {
                // Every receiver is gone; drop the channel unless a new
                // subscriber raced in.
                self.topics
                    .remove_if(topic, |_, tx| tx.receiver_count() == 0);
                0
            }
        }
    }
}

impl Broadcaster for TopicHub {
    async fn publish(
        &self,
        topic: &Topic,
        event: TopicEvent,
        exclude: Option<&ConnectionId>,
    ) -> Result<usize, BroadcastError> {
        let message_id = event.message().id;
        let delivered = self.send(
            topic,
            Envelope {
                event,
                exclude: exclude.cloned(),
            },
        );
        debug!(%topic, %message_id, delivered, "Published topic event");
        Ok(delivered)
    }

    fn subscribe(
        &self,
        topic: &Topic,
        connection: ConnectionId,
    ) -> Result<Subscription, BroadcastError> {
        let receiver = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!(%topic, %connection, "Subscribed to topic");

        Ok(Subscription {
            topic: topic.clone(),
            connection,
            receiver,
            topics: Arc::clone(&self.topics),
        })
    }
}

impl std::fmt::Debug for TopicHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicHub")
            .field("topics", &self.topics.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// A live subscription of one connection to one topic.
///
/// Envelopes that exclude this connection are skipped, so a publisher never
/// sees its own events echoed back.
pub struct Subscription {
    topic: Topic,
    connection: ConnectionId,
    receiver: broadcast::Receiver<Envelope>,
    topics: Arc<TopicMap>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn connection(&self) -> &ConnectionId {
        &self.connection
    }

    /// Wait for the next event addressed to this connection.
    ///
    /// Returns `None` once the topic channel is closed. A lagging subscriber
    /// logs how many events it missed and keeps going.
    pub async fn recv(&mut self) -> Option<TopicEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if envelope.exclude.as_ref() == Some(&self.connection) {
                        continue;
                    }
                    return Some(envelope.event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        topic = %self.topic,
                        connection = %self.connection,
                        skipped,
                        "Subscriber lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Our own receiver is still alive here, hence `<= 1`.
        self.topics
            .remove_if(&self.topic, |_, tx| tx.receiver_count() <= 1);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("connection", &self.connection)
            .finish()
    }
}
