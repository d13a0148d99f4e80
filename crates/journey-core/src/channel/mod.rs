//! Channel sender port.
//!
//! Abstracts outbound message delivery. Implementations classify every
//! failure as transient or permanent; the execution engine retries only the
//! transient ones.

use journey_types::channel::{DeliveryReceipt, Recipient};
use journey_types::error::ChannelError;

/// Outbound message delivery.
pub trait ChannelSender: Send + Sync {
    /// Deliver rendered `content` to `recipient`.
    fn send(
        &self,
        recipient: &Recipient,
        content: &str,
    ) -> impl std::future::Future<Output = Result<DeliveryReceipt, ChannelError>> + Send;
}
