//! Configuration loading with layered precedence.
//!
//! Layers are composed manually with `MergeComposer` rather than through the
//! derive's `load()`, because the `Cli` struct owns subcommand dispatch and
//! already accepts `--config`, and because typed environment variables must
//! fail fast instead of being silently ignored.
//!
//! # Environment Variable Handling
//!
//! Environment variables with unparseable values (e.g.,
//! `VULNLAB_LIFECYCLE_DEFAULT_TTL_SECS=soon`) return an error immediately.
//! String fields (e.g., `VULNLAB_ENGINE_SOCKET`) are always accepted.

use camino::Utf8PathBuf;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use ortho_config::discovery::ConfigDiscovery;
use ortho_config::serde_json::{self, Map, Value};
use ortho_config::{MergeComposer, toml};

use crate::config::{AppConfig, Cli};
use crate::error::{ConfigError, Result};

/// The type of value expected from an environment variable.
#[derive(Clone, Copy)]
enum EnvVarType {
    /// String value (always accepted).
    String,
    /// Unsigned 64-bit integer. Invalid values return an error.
    U64,
    /// `pretty` or `json`. Invalid values return an error.
    LogFormat,
}

/// Specification for a single environment variable mapping.
struct EnvVarSpec {
    /// The environment variable name (e.g., `VULNLAB_ENGINE_SOCKET`).
    env_var: &'static str,
    /// The JSON path segments (e.g., `["lifecycle", "extension_secs"]`).
    path: &'static [&'static str],
    /// The expected value type.
    var_type: EnvVarType,
}

/// Table of all environment variables and their JSON paths.
const ENV_VAR_SPECS: &[EnvVarSpec] = &[
    // Top-level fields
    EnvVarSpec {
        env_var: "VULNLAB_ENGINE_SOCKET",
        path: &["engine_socket"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "VULNLAB_CATALOG_DIR",
        path: &["catalog_dir"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "VULNLAB_PROXY",
        path: &["proxy"],
        var_type: EnvVarType::String,
    },
    // Lifecycle fields
    EnvVarSpec {
        env_var: "VULNLAB_LIFECYCLE_DEFAULT_TTL_SECS",
        path: &["lifecycle", "default_ttl_secs"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "VULNLAB_LIFECYCLE_EXTENSION_SECS",
        path: &["lifecycle", "extension_secs"],
        var_type: EnvVarType::U64,
    },
    EnvVarSpec {
        env_var: "VULNLAB_LIFECYCLE_REAP_INTERVAL_SECS",
        path: &["lifecycle", "reap_interval_secs"],
        var_type: EnvVarType::U64,
    },
    // Logging fields
    EnvVarSpec {
        env_var: "VULNLAB_LOGGING_LEVEL",
        path: &["logging", "level"],
        var_type: EnvVarType::String,
    },
    EnvVarSpec {
        env_var: "VULNLAB_LOGGING_FORMAT",
        path: &["logging", "format"],
        var_type: EnvVarType::LogFormat,
    },
];

/// Returns the list of environment variable names recognised by the config loader.
///
/// Tests use this to clear every `VULNLAB_*` variable the loader reads.
#[must_use]
pub fn env_var_names() -> Vec<&'static str> {
    ENV_VAR_SPECS.iter().map(|spec| spec.env_var).collect()
}

/// Load a configuration file and push it to the composer.
fn load_config_file(path: &Utf8PathBuf, composer: &mut MergeComposer) -> Result<()> {
    let current_dir = Utf8PathBuf::from(".");
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| current_dir.as_ref());
    let file_name = path.file_name().unwrap_or(path.as_str());

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|e| {
        ConfigError::ParseError {
            message: format!("failed to open directory {parent}: {e}"),
        }
    })?;

    let content = dir
        .read_to_string(file_name)
        .map_err(|e| ConfigError::ParseError {
            message: format!("failed to read {path}: {e}"),
        })?;

    let value =
        toml::from_str::<serde_json::Value>(&content).map_err(|e| ConfigError::ParseError {
            message: format!("failed to parse {path}: {e}"),
        })?;

    composer.push_file(value, Some(path.clone()));
    Ok(())
}

/// Load configuration with full layer precedence.
///
/// 1. Application defaults
/// 2. Configuration file (`--config`, `VULNLAB_CONFIG_PATH`, `.vulnlab.toml`
///    or `~/.config/vulnlab/config.toml`)
/// 3. Environment variables prefixed with `VULNLAB_`
/// 4. Command-line arguments
///
/// Later sources override earlier ones.
///
/// # Errors
///
/// Returns `ConfigError` for a malformed configuration file, an invalid
/// typed environment variable, or a merge failure.
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut composer = MergeComposer::new();

    let defaults =
        serde_json::to_value(AppConfig::default()).map_err(|e| ConfigError::ParseError {
            message: format!("failed to serialise defaults: {e}"),
        })?;
    composer.push_defaults(defaults);

    let config_path: Option<Utf8PathBuf> =
        cli.config.clone().filter(|p| p.exists()).or_else(|| {
            let discovery = ConfigDiscovery::builder("vulnlab")
                .env_var("VULNLAB_CONFIG_PATH")
                .config_file_name("config.toml")
                .dotfile_name(".vulnlab.toml")
                .build();
            discovery
                .candidates()
                .into_iter()
                .filter(|p| p.exists())
                .find_map(|p| Utf8PathBuf::try_from(p).ok())
        });

    if let Some(ref path) = config_path {
        load_config_file(path, &mut composer)?;
    }

    let env_values = collect_env_vars()?;
    if !env_values.is_null() {
        composer.push_environment(env_values);
    }

    let cli_overrides = build_cli_overrides(cli);
    if !cli_overrides.is_null() {
        composer.push_cli(cli_overrides);
    }

    let config =
        AppConfig::merge_from_layers(composer.layers()).map_err(ConfigError::OrthoConfig)?;

    Ok(config)
}

/// Collect environment variables with the `VULNLAB_` prefix into a JSON value.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if a typed environment variable has an
/// unparseable value.
fn collect_env_vars() -> Result<Value> {
    let mut root = Map::new();

    for spec in ENV_VAR_SPECS {
        let Ok(raw_value) = std::env::var(spec.env_var) else {
            continue;
        };
        let json_value = parse_env_value(spec, raw_value)?;
        insert_at_path(&mut root, spec.path, json_value);
    }

    if root.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Object(root))
    }
}

fn parse_env_value(spec: &EnvVarSpec, raw_value: String) -> Result<Value> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: spec.env_var.to_owned(),
        reason,
    };
    match spec.var_type {
        EnvVarType::String => Ok(Value::String(raw_value)),
        EnvVarType::U64 => raw_value.parse::<u64>().map_or_else(
            |_| Err(invalid(format!("expected unsigned integer, got '{raw_value}'")).into()),
            |n| Ok(Value::Number(n.into())),
        ),
        EnvVarType::LogFormat => match raw_value.to_ascii_lowercase().as_str() {
            "pretty" | "json" => Ok(Value::String(raw_value.to_ascii_lowercase())),
            _ => Err(invalid(format!("expected 'pretty' or 'json', got '{raw_value}'")).into()),
        },
    }
}

/// Insert a value at a nested path in a JSON map.
///
/// For a path like `["lifecycle", "extension_secs"]`, this creates the
/// intermediate `lifecycle` object if needed.
fn insert_at_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((&field, parents)) = path.split_last() else {
        return;
    };

    let mut current = root;
    for &segment in parents {
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(obj) = entry.as_object_mut() else {
            return;
        };
        current = obj;
    }

    current.insert(field.to_owned(), value);
}

/// Build a JSON value containing CLI overrides.
fn build_cli_overrides(cli: &Cli) -> serde_json::Value {
    let mut overrides = serde_json::Map::new();

    if let Some(ref socket) = cli.engine_socket {
        overrides.insert(
            "engine_socket".to_owned(),
            serde_json::Value::String(socket.clone()),
        );
    }

    if let Some(ref catalog_dir) = cli.catalog_dir {
        overrides.insert(
            "catalog_dir".to_owned(),
            serde_json::Value::String(catalog_dir.to_string()),
        );
    }

    if let Some(ref level) = cli.log_level {
        let mut logging = serde_json::Map::new();
        logging.insert("level".to_owned(), serde_json::Value::String(level.clone()));
        overrides.insert("logging".to_owned(), serde_json::Value::Object(logging));
    }

    if overrides.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::Value::Object(overrides)
    }
}
