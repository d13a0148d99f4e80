//! Repository and collaborator trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (journey-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod contact;
pub mod goal;
pub mod workflow;
