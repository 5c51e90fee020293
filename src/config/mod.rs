//! Configuration system for vulnlab.
//!
//! This module provides the configuration structures and CLI definitions for
//! the vulnlab application. Precedence merging is handled by the
//! `ortho_config` crate: CLI flags override environment variables, which
//! override configuration files, which override defaults.
//!
//! The configuration file is expected at `~/.config/vulnlab/config.toml` by
//! default.
//!
//! # Example Configuration
//!
//! ```toml
//! engine_socket = "unix:///var/run/docker.sock"
//! catalog_dir = "/srv/vulnlab/storage"
//! proxy = "http://proxy.internal:3128"
//!
//! [lifecycle]
//! default_ttl_secs = 1800
//! extension_secs = 1800
//! reap_interval_secs = 60
//!
//! [logging]
//! level = "info,vulnlab=debug"
//! format = "json"
//! ```

mod cli;
mod loader;
mod types;

#[cfg(test)]
mod tests;

pub use cli::{
    BuildArgs, Cli, Commands, ComposeArgs, DownArgs, PullArgs, RmArgs, UpArgs,
};
pub use loader::{env_var_names, load_config};
pub use types::{AppConfig, LifecycleConfig, LogFormat, LoggingConfig};
