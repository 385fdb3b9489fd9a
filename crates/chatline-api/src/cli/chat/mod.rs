//! Interactive terminal chat against a running server.
//!
//! The terminal is one more client connection: it seeds a `Reconciler` from
//! the stored transcript, shows its own input optimistically, streams
//! replies into a placeholder, and merges messages other connections
//! produce in the same session. Entry point: `loop_runner::run_chat_loop`.

pub mod banner;
pub mod client;
pub mod commands;
pub mod input;
pub mod loop_runner;
