use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::QRegistryConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "qregistry.toml",
    "qregistry.yaml",
    "qregistry.yml",
    "qregistry.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<QRegistryConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./qregistry.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/qregistry/qregistry.{toml,yaml,yml,json}` (user-global)
///
/// Returns `QRegistryConfig::default()` only if no config file exists. A
/// file that exists but fails to load is an error.
pub fn discover_and_load() -> Result<QRegistryConfig> {
    load_or_default(find_config_file().as_deref())
}

fn load_or_default(path: Option<&Path>) -> Result<QRegistryConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(path)
        },
        None => {
            debug!("no config file found, using defaults");
            Ok(QRegistryConfig::default())
        },
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/qregistry/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "qregistry").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory holding the default database.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "qregistry")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// SQLite URL used when `[database] url` is not set.
pub fn default_database_url() -> String {
    format!("sqlite:{}?mode=rwc", data_dir().join("qregistry.db").display())
}

/// Apply `QREGISTRY_*` environment overrides on top of a loaded config.
///
/// - `QREGISTRY_SUFFIX` replaces `registry.suffix`
/// - `QREGISTRY_DATABASE_URL` replaces `database.url`
pub fn apply_env_overrides(config: QRegistryConfig) -> QRegistryConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: QRegistryConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> QRegistryConfig {
    if let Some(suffix) = lookup("QREGISTRY_SUFFIX") {
        debug!(suffix = %suffix, "suffix overridden from environment");
        config.registry.suffix = suffix;
    }
    if let Some(url) = lookup("QREGISTRY_DATABASE_URL") {
        config.database.url = Some(url);
    }
    config
}

fn parse_config(raw: &str, path: &Path) -> Result<QRegistryConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

/// Parse a config file into a generic JSON tree, for validation.
pub(crate) fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
