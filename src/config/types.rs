//! Configuration data types for vulnlab.

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::ValueEnum;
use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lifecycle::LifecycleSettings;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: LogFormat::Pretty,
        }
    }
}

/// Instance lifetime and reaper configuration, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Lifetime of a new instance.
    pub default_ttl_secs: u64,

    /// Amount one expiry extension adds.
    pub extension_secs: u64,

    /// Time between reaper sweeps.
    pub reap_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 1800,
            extension_secs: 1800,
            reap_interval_secs: 60,
        }
    }
}

impl LifecycleConfig {
    /// Convert to the lifecycle policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a duration is zero or too
    /// large to represent.
    pub fn settings(&self) -> Result<LifecycleSettings, ConfigError> {
        Ok(LifecycleSettings {
            default_ttl: seconds("lifecycle.default_ttl_secs", self.default_ttl_secs)?,
            extension: seconds("lifecycle.extension_secs", self.extension_secs)?,
        })
    }

    /// Time between reaper sweeps.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when the interval is zero.
    pub fn reap_interval(&self) -> Result<Duration, ConfigError> {
        if self.reap_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: String::from("lifecycle.reap_interval_secs"),
                reason: String::from("must be greater than zero"),
            });
        }
        Ok(Duration::from_secs(self.reap_interval_secs))
    }
}

fn seconds(field: &str, secs: u64) -> Result<chrono::Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        field: String::from(field),
        reason: String::from(reason),
    };
    if secs == 0 {
        return Err(invalid("must be greater than zero"));
    }
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| invalid("too large"))
}

/// Root application configuration.
///
/// This structure is loaded from configuration files, environment variables,
/// and command-line arguments with layered precedence. The precedence order
/// (lowest to highest) is: defaults, configuration file, environment variables,
/// command-line arguments.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `VULNLAB_CONFIG_PATH` environment variable
/// 2. `.vulnlab.toml` in the current working directory
/// 3. `.vulnlab.toml` in the home directory
/// 4. `~/.config/vulnlab/config.toml` (XDG default)
#[derive(Debug, Clone, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(
    prefix = "VULNLAB",
    post_merge_hook,
    discovery(
        app_name = "vulnlab",
        env_var = "VULNLAB_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".vulnlab.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct AppConfig {
    /// The container engine socket path or URL.
    pub engine_socket: Option<String>,

    /// Directory holding catalog JSON files and compose projects.
    #[serde(default = "default_catalog_dir")]
    #[ortho_config(skip_cli)]
    pub catalog_dir: Utf8PathBuf,

    /// HTTP(S) proxy passed to image builds; empty means none.
    #[ortho_config(skip_cli)]
    pub proxy: Option<String>,

    /// Instance lifetime configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub lifecycle: LifecycleConfig,

    /// Logging configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub logging: LoggingConfig,
}

fn default_catalog_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("./storage")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine_socket: None,
            catalog_dir: default_catalog_dir(),
            proxy: None,
            lifecycle: LifecycleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        if self
            .proxy
            .as_deref()
            .is_some_and(|proxy| proxy.trim().is_empty())
        {
            self.proxy = None;
        }
        Ok(())
    }
}
