//! MessageStore trait definition.
//!
//! The message store is the durable, append-only log of chat messages and the
//! single source of truth for every transcript.

use chatline_types::chat::{ChatMessage, NewMessage};
use chatline_types::error::StoreError;

/// Append-only message log, keyed by session.
///
/// Implementations live in chatline-infra (e.g., `SqliteMessageStore`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
///
/// Sessions are implicit: a session exists exactly when at least one message
/// carries its `session_id`, and listing an unknown session yields an empty
/// transcript rather than an error.
pub trait MessageStore: Send + Sync {
    /// Durably append a message, assigning its `id` and `timestamp`.
    ///
    /// The write is committed before this returns. The returned message is
    /// exactly what later reads will yield.
    fn append(
        &self,
        message: &NewMessage,
    ) -> impl std::future::Future<Output = Result<ChatMessage, StoreError>> + Send;

    /// All messages of a session, ascending by timestamp with ties broken by
    /// insertion order.
    fn list_by_session(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, StoreError>> + Send;

    /// Number of messages stored for a session.
    fn count_by_session(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;
}
