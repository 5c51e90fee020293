//! Shared fixtures and helper functions for config tests.

use crate::config::{AppConfig, LogFormat};
use ortho_config::MergeComposer;
use rstest::fixture;
use std::sync::Arc;

/// Fixture providing an `AppConfig` parsed from a full TOML example.
#[fixture]
pub fn app_config_from_full_toml() -> AppConfig {
    let toml = r#"
        engine_socket = "unix:///var/run/docker.sock"
        catalog_dir = "/srv/vulnlab/storage"
        proxy = "http://proxy.internal:3128"

        [lifecycle]
        default_ttl_secs = 600
        extension_secs = 300
        reap_interval_secs = 15

        [logging]
        level = "debug"
        format = "json"
    "#;

    toml::from_str(toml).expect("TOML parsing should succeed")
}

/// Fixture providing an `AppConfig` parsed from a minimal TOML example.
#[fixture]
pub fn app_config_from_partial_toml() -> AppConfig {
    let toml = r#"
        engine_socket = "unix:///tmp/docker.sock"
    "#;

    toml::from_str(toml).expect("TOML parsing should succeed")
}

/// Helper: Creates a `MergeComposer` with defaults layer already pushed.
pub fn create_composer_with_defaults() -> Result<MergeComposer, serde_json::Error> {
    let mut composer = MergeComposer::new();
    let defaults = ortho_config::serde_json::to_value(AppConfig::default())?;
    composer.push_defaults(defaults);
    Ok(composer)
}

/// Helper: Merges layers from a composer into `AppConfig`.
pub fn merge_config(composer: MergeComposer) -> Result<AppConfig, Arc<ortho_config::OrthoError>> {
    AppConfig::merge_from_layers(composer.layers())
}

/// Helper: Asserts that a config has all default values.
pub fn assert_config_has_defaults(config: &AppConfig) {
    assert!(
        config.engine_socket.is_none(),
        "engine_socket should be None"
    );
    assert_eq!(config.catalog_dir.as_str(), "./storage");
    assert!(config.proxy.is_none(), "proxy should be None");
    assert_eq!(config.lifecycle.default_ttl_secs, 1800);
    assert_eq!(config.lifecycle.extension_secs, 1800);
    assert_eq!(config.lifecycle.reap_interval_secs, 60);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.format, LogFormat::Pretty);
}

/// Helper: Creates a `MergeComposer` with defaults, file, and env layers for
/// testing layer precedence.
pub fn create_composer_with_file_and_env() -> Result<MergeComposer, serde_json::Error> {
    use ortho_config::serde_json::json;

    let mut composer = create_composer_with_defaults()?;

    composer.push_file(
        json!({
            "engine_socket": "unix:///from/file.sock",
            "catalog_dir": "/from/file"
        }),
        None,
    );

    composer.push_environment(json!({
        "engine_socket": "unix:///from/env.sock"
    }));

    Ok(composer)
}
