//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls retry
//! back-off, tick sizing, maintenance, and the outbound channel.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the journey engine.
///
/// Loaded from `~/.journey/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Transient failures tolerated per execution before it fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential back-off, in seconds.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound on a single back-off delay, in seconds.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Jitter added on top of the delay, as a fraction of it.
    #[serde(default = "default_backoff_jitter_ratio")]
    pub backoff_jitter_ratio: f64,

    /// Maximum node steps one execution advances per invocation.
    #[serde(default = "default_step_budget")]
    pub step_budget: u32,

    /// Maximum executions processed concurrently within a tick.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum rows fetched by each due-time sweep.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u32,

    /// Days terminal executions are retained before maintenance deletes them.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maintenance runs on roughly one tick in this many.
    #[serde(default = "default_maintenance_every_ticks")]
    pub maintenance_every_ticks: u32,

    /// Seconds without progress after which a running execution is re-queued.
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,

    /// Cadence of the built-in tick driver (cron or "every N minutes").
    #[serde(default = "default_tick_schedule")]
    pub tick_schedule: String,

    /// Bearer token required by `POST /api/v1/tick`, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_secret: Option<String>,

    /// Outbound channel settings.
    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_backoff_cap_secs() -> u64 {
    3600
}

fn default_backoff_jitter_ratio() -> f64 {
    0.1
}

fn default_step_budget() -> u32 {
    50
}

fn default_concurrency() -> usize {
    20
}

fn default_batch_limit() -> u32 {
    100
}

fn default_retention_days() -> u32 {
    90
}

fn default_maintenance_every_ticks() -> u32 {
    100
}

fn default_stall_timeout_secs() -> u64 {
    900
}

fn default_tick_schedule() -> String {
    "every minute".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            backoff_jitter_ratio: default_backoff_jitter_ratio(),
            step_budget: default_step_budget(),
            concurrency: default_concurrency(),
            batch_limit: default_batch_limit(),
            retention_days: default_retention_days(),
            maintenance_every_ticks: default_maintenance_every_ticks(),
            stall_timeout_secs: default_stall_timeout_secs(),
            tick_schedule: default_tick_schedule(),
            tick_secret: None,
            channel: ChannelConfig::default(),
        }
    }
}

/// Outbound channel configuration.
///
/// Without a `webhook_url`, messages are written to the log only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// When set, webhook requests carry an HMAC-SHA256 signature of the body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,

    #[serde(default = "default_channel_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_channel_timeout_secs() -> u64 {
    10
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            timeout_secs: default_channel_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.step_budget, 50);
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.concurrency, 20);
        assert!(config.tick_secret.is_none());
        assert!(config.channel.webhook_url.is_none());
    }

    #[test]
    fn test_engine_config_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
max_retries = 5
backoff_base_secs = 10

[channel]
webhook_url = "https://hooks.example.com/send"
"#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base_secs, 10);
        assert_eq!(config.backoff_cap_secs, 3600);
        assert_eq!(config.channel.timeout_secs, 10);
        assert_eq!(
            config.channel.webhook_url.as_deref(),
            Some("https://hooks.example.com/send")
        );
    }

    #[test]
    fn test_engine_config_empty_toml_is_default() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.tick_schedule, "every minute");
        assert_eq!(config.maintenance_every_ticks, 100);
    }
}
