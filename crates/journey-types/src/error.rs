use thiserror::Error;

use crate::execution::FailureKind;

/// Errors from repository operations (used by trait definitions in journey-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// A classified delivery failure returned by a channel sender.
#[derive(Debug, Clone, Error)]
#[error("{kind} delivery failure: {message}")]
pub struct ChannelError {
    pub kind: FailureKind,
    pub message: String,
}

impl ChannelError {
    /// A failure that may succeed later (rate limit, timeout, 5xx).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    /// A failure that will not succeed on retry (invalid recipient, rejected content).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}
