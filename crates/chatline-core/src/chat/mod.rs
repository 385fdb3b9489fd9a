//! Chat turn orchestration and client-side reconciliation.
//!
//! - `SessionCoordinator`: persist, broadcast, stream, finalize
//! - `Reconciler`: merges optimistic, streamed, and broadcast state into one
//!   ordered transcript per client

pub mod best_effort;
pub mod coordinator;
pub mod reconcile;
pub mod turn;

pub use coordinator::{ReplyEvent, ReplyStream, SessionCoordinator, TurnReply};
pub use reconcile::{EntryState, Finalization, MergeOutcome, Reconciler, TranscriptEntry};
pub use turn::{ChatTurn, HistoryEntry};
