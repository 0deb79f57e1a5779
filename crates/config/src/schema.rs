//! Config schema types (registry, static tasks, database).
use serde::{Deserialize, Serialize};

/// Suffix appended to every schedule name this system manages.
pub const DEFAULT_SUFFIX: &str = " - QREGISTRY";

/// Suffix used by the predecessor naming scheme. Schedules ending with it are
/// always swept during cleanup.
pub const LEGACY_SUFFIX: &str = " - CRON";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QRegistryConfig {
    pub registry: RegistryConfig,
    pub database: DatabaseConfig,
}

/// Registry settings: namespacing suffix and static task declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Appended to the task name to form the schedule name.
    #[serde(alias = "periodic_task_suffix")]
    pub suffix: String,
    /// Declarations registered at startup, in order.
    #[serde(alias = "static_tasks")]
    pub tasks: Vec<StaticTask>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.into(),
            tasks: Vec::new(),
        }
    }
}

/// One static task declaration.
///
/// `func` is kept as a raw value so that a non-string target is reported
/// when the registry loads it rather than as a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTask {
    pub func: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Everything else: scheduler fields and call arguments.
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Where persisted task and schedule records live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL. `None` means `<data_dir>/qregistry.db`.
    pub url: Option<String>,
}
