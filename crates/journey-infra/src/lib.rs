//! Infrastructure layer for the journey engine.
//!
//! Contains implementations of the ports defined in `journey-core`: SQLite
//! storage for workflows, executions, schedules and retry state, the contact
//! store and goal sink, outbound channel senders, and the config loader.

pub mod channel;
pub mod config;
pub mod sqlite;
