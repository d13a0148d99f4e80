//! Channel sender that POSTs each message to an HTTP endpoint.
//!
//! Failure classification:
//! - timeouts, connection errors, 408, 425, 429 and 5xx are transient
//! - any other non-2xx status is permanent

use std::time::Duration;

use chrono::Utc;
use journey_core::channel::ChannelSender;
use journey_types::channel::{DeliveryReceipt, Recipient};
use journey_types::error::ChannelError;
use journey_types::execution::FailureKind;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signature::{SIGNATURE_HEADER, sign_body};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    contact_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    content: &'a str,
}

/// Optional acknowledgement body. Endpoints that return nothing get a
/// generated message id.
#[derive(Deserialize)]
struct WebhookAck {
    message_id: Option<String>,
}

/// Delivers messages as signed JSON POSTs.
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookSender {
    pub fn new(url: String, secret: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url, secret })
    }
}

/// Whether a non-success HTTP status is worth retrying.
pub fn classify_status(status: StatusCode) -> FailureKind {
    match status.as_u16() {
        408 | 425 | 429 => FailureKind::Transient,
        s if s >= 500 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

impl ChannelSender for WebhookSender {
    async fn send(&self, recipient: &Recipient, content: &str) -> Result<DeliveryReceipt, ChannelError> {
        let body = serde_json::to_vec(&WebhookPayload {
            contact_id: recipient.contact_id,
            address: recipient.address.as_deref(),
            channel: recipient.channel.as_deref(),
            content,
        })
        .map_err(|e| ChannelError::permanent(format!("serialize payload: {e}")))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json");
        if let Some(secret) = &self.secret {
            let signature = sign_body(secret.as_bytes(), &body)
                .map_err(|e| ChannelError::permanent(e.to_string()))?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_builder() {
                ChannelError::permanent(format!("invalid webhook request: {e}"))
            } else {
                ChannelError::transient(format!("webhook request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {status}: {error_body}");
            tracing::debug!(contact_id = %recipient.contact_id, %status, "webhook delivery rejected");
            return Err(match classify_status(status) {
                FailureKind::Transient => ChannelError::transient(message),
                FailureKind::Permanent => ChannelError::permanent(message),
            });
        }

        let ack = response.json::<WebhookAck>().await.ok();
        let message_id = ack
            .and_then(|a| a.message_id)
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        tracing::debug!(contact_id = %recipient.contact_id, %message_id, "webhook delivery accepted");
        Ok(DeliveryReceipt {
            message_id,
            sent_at: Utc::now(),
        })
    }
}
