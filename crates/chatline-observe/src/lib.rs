//! Observability for Chatline: tracing subscriber setup and shutdown.

pub mod tracing_setup;
