//! Tracing subscriber initialisation.
//!
//! `RUST_LOG` takes precedence over the configured filter so operators can
//! raise verbosity for a single run without editing configuration.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ConfigError;

/// Install the global tracing subscriber.
///
/// Must be called once, before the first event is recorded.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` when the configured filter directive
/// does not parse or a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };

    installed.map_err(|e| ConfigError::InvalidValue {
        field: String::from("logging"),
        reason: format!("failed to install tracing subscriber: {e}"),
    })
}

/// Build the event filter from `RUST_LOG`, falling back to `config.level`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` when the fallback directive is
/// malformed.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&config.level).map_err(|e| ConfigError::InvalidValue {
            field: String::from("logging.level"),
            reason: e.to_string(),
        })
    })
}
