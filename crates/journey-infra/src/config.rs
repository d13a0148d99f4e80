//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.journey/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::{Path, PathBuf};

use journey_types::config::EngineConfig;

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `JOURNEY_DATA_DIR` environment variable
/// 2. `~/.journey`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("JOURNEY_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".journey");
    }

    PathBuf::from(".journey")
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparseable file: logs a warning and returns the default.
/// - Otherwise the parsed config, with out-of-range values clamped.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => sanitize(config),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Clamp values that would stall the engine.
fn sanitize(mut config: EngineConfig) -> EngineConfig {
    if config.step_budget == 0 {
        tracing::warn!("step_budget = 0 would never advance executions, using 1");
        config.step_budget = 1;
    }
    if config.concurrency == 0 {
        tracing::warn!("concurrency = 0 would never run jobs, using 1");
        config.concurrency = 1;
    }
    if config.batch_limit == 0 {
        tracing::warn!("batch_limit = 0 would never fetch due work, using 1");
        config.batch_limit = 1;
    }
    if config.backoff_cap_secs < config.backoff_base_secs {
        config.backoff_cap_secs = config.backoff_base_secs;
    }
    if !config.backoff_jitter_ratio.is_finite() || config.backoff_jitter_ratio < 0.0 {
        config.backoff_jitter_ratio = 0.0;
    }
    config
}
