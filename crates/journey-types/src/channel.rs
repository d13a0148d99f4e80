//! Outbound message delivery types shared by the channel sender port and its
//! adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who a message is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub contact_id: Uuid,
    /// Resolved delivery address (phone number, email, ...), when the node
    /// names a recipient field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Channel label from the message node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Proof of a successful hand-off to the delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-assigned message id.
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}
