//! # Structured Logging
//!
//! Subscriber setup for hosts that do not install their own. The library
//! itself only emits `tracing` events; calling [`init_logging`] is optional.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::error::{MediationError, MediationResult};

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// A level name, or a full filter directive such as `mediation_cache=debug,info`
    pub level: String,

    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogConfig {
    pub(crate) fn validation_errors(&self) -> Vec<String> {
        let level = self.level.trim();
        let valid = if level.contains('=') || level.contains(',') {
            EnvFilter::try_new(level).is_ok()
        } else {
            LEVELS.contains(&level.to_lowercase().as_str())
        };

        if valid {
            Vec::new()
        } else {
            vec![format!("Invalid log level: {}", self.level)]
        }
    }

    fn env_filter(&self) -> MediationResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.level.trim().to_lowercase())
            .map_err(|e| MediationError::config(format!("Invalid log level '{}': {}", self.level, e)))
    }
}

/// Install a global subscriber; `RUST_LOG` takes precedence over the configured level
///
/// Returns `false` when another subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> MediationResult<bool> {
    if let Some(error) = config.validation_errors().into_iter().next() {
        return Err(MediationError::config(error));
    }

    let env_filter = config.env_filter()?;

    let installed = match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()
            .is_ok(),
        LogFormat::Text => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
            .is_ok(),
    };

    if installed {
        info!(level = %config.level, format = ?config.format, "Structured logging initialized");
    } else {
        warn!("Tracing subscriber already initialized, skipping initialization");
    }

    Ok(installed)
}
