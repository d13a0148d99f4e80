//! Channel sender that only logs deliveries.

use chrono::Utc;
use journey_core::channel::ChannelSender;
use journey_types::channel::{DeliveryReceipt, Recipient};
use journey_types::error::ChannelError;
use uuid::Uuid;

/// Accepts every message and writes it to the log. Used when no webhook is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

impl ChannelSender for LogSender {
    async fn send(&self, recipient: &Recipient, content: &str) -> Result<DeliveryReceipt, ChannelError> {
        let message_id = Uuid::now_v7().to_string();
        tracing::info!(
            contact_id = %recipient.contact_id,
            address = recipient.address.as_deref().unwrap_or("-"),
            channel = recipient.channel.as_deref().unwrap_or("-"),
            message_id = %message_id,
            chars = content.chars().count(),
            "message delivered to log channel"
        );
        Ok(DeliveryReceipt {
            message_id,
            sent_at: Utc::now(),
        })
    }
}
