//! Topic broadcaster for session fan-out.
//!
//! Provides the `Broadcaster` port and `TopicHub`, an in-process
//! implementation with one `tokio::sync::broadcast` channel per topic.
//! Echo suppression is enforced on the receiving side: every envelope carries
//! the connection it must not reach.

pub mod broadcaster;
pub mod hub;

pub use broadcaster::{Broadcaster, Envelope};
pub use hub::{Subscription, TopicHub};
