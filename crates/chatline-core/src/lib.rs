//! Business logic and port trait definitions for Chatline.
//!
//! This crate defines the "ports" (store, broadcaster, and provider traits)
//! that the infrastructure layer implements, plus the coordinator and
//! reconciler built on them. It depends only on `chatline-types` -- never
//! on `chatline-infra` or any database/IO crate.

pub mod broadcast;
pub mod chat;
pub mod llm;
pub mod repository;

#[cfg(test)]
pub(crate) mod testing;
