//! Channel sender adapters.
//!
//! `ConfiguredSender` picks the webhook sender when `[channel] webhook_url`
//! is set and the log sender otherwise.

pub mod log;
pub mod signature;
pub mod webhook;

use std::time::Duration;

use journey_core::channel::ChannelSender;
use journey_types::channel::{DeliveryReceipt, Recipient};
use journey_types::config::ChannelConfig;
use journey_types::error::ChannelError;

use self::log::LogSender;
use self::webhook::WebhookSender;

/// The sender selected by configuration.
pub enum ConfiguredSender {
    Log(LogSender),
    Webhook(WebhookSender),
}

impl ConfiguredSender {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, reqwest::Error> {
        match &config.webhook_url {
            Some(url) => {
                tracing::info!(url = %url, signed = config.webhook_secret.is_some(), "using webhook channel");
                Ok(ConfiguredSender::Webhook(WebhookSender::new(
                    url.clone(),
                    config.webhook_secret.clone(),
                    Duration::from_secs(config.timeout_secs),
                )?))
            }
            None => {
                tracing::info!("no webhook configured, messages go to the log channel");
                Ok(ConfiguredSender::Log(LogSender))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfiguredSender::Log(_) => "log",
            ConfiguredSender::Webhook(_) => "webhook",
        }
    }
}

impl ChannelSender for ConfiguredSender {
    async fn send(&self, recipient: &Recipient, content: &str) -> Result<DeliveryReceipt, ChannelError> {
        match self {
            ConfiguredSender::Log(s) => s.send(recipient, content).await,
            ConfiguredSender::Webhook(s) => s.send(recipient, content).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_selects_sender() {
        let log = ConfiguredSender::from_config(&ChannelConfig::default()).unwrap();
        assert_eq!(log.name(), "log");

        let config = ChannelConfig {
            webhook_url: Some("https://hooks.example.com/send".into()),
            ..ChannelConfig::default()
        };
        assert_eq!(ConfiguredSender::from_config(&config).unwrap().name(), "webhook");
    }
}
