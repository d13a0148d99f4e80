//! Observability setup for the journey engine.

pub mod tracing_setup;
