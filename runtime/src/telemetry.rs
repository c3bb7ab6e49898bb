//! Logging setup.

use crate::config::ObservabilityConfig;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors from [`init_tracing`].
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The configured filter does not parse
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter {
        /// Rejected filter
        filter: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Build the log filter: `RUST_LOG` when set, otherwise the configured level.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] if the configured level does not parse.
pub fn env_filter(config: &ObservabilityConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter {
        filter: config.log_level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global `tracing` subscriber.
///
/// Call once at process start, before booting modules.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already
/// installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| TelemetryError::Install(e.to_string()))?;

    tracing::info!(level = %config.log_level, "Tracing initialized");
    Ok(())
}
