//! HTTP request handlers for the REST API.

pub mod execution;
pub mod tick;
