//! SQLite storage layer.
//!
//! `MessageStore` backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod message;
pub mod pool;
