//! Configuration loading, validation and env substitution.
//!
//! Config files: `qregistry.toml`, `qregistry.yaml`, or `qregistry.json`
//! Searched in `./` then `~/.config/qregistry/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, default_database_url, discover_and_load,
        find_config_file, load_config,
    },
    schema::{
        DEFAULT_SUFFIX, DatabaseConfig, LEGACY_SUFFIX, QRegistryConfig, RegistryConfig,
        StaticTask,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
