//! HTTP/REST API layer.
//!
//! Axum-based REST API at `/api/v1/` with envelope responses. The tick
//! endpoint is guarded by the configured tick secret.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
