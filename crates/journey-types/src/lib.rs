//! Shared domain types for the journey engine.
//!
//! Workflows (node graphs), executions, schedules, retry bookkeeping, goal
//! events, engine configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod channel;
pub mod config;
pub mod error;
pub mod execution;
pub mod schedule;
pub mod workflow;
