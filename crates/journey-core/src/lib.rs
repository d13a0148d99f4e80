//! Business logic and port trait definitions for the journey engine.
//!
//! This crate defines the "ports" (repository and collaborator traits) that
//! the infrastructure layer implements, plus the engine itself: node
//! evaluation, the execution state machine, scheduling, retries, and the
//! periodic tick. It depends only on `journey-types` -- never on
//! `journey-infra` or any database/IO crate.

pub mod channel;
pub mod repository;
pub mod workflow;
