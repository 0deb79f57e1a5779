//! Core data types: declared tasks, persisted task records, schedules.

use std::hash::{Hash, Hasher};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

/// Named arguments and scheduler fields, passed through opaquely.
pub type Params = serde_json::Map<String, Value>;

/// Serialize a JSON value with object keys sorted at every level, so equal
/// values always produce the same string.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn canonical_params(params: &Params) -> String {
    canonical_json(&Value::Object(params.clone()))
}

/// Identity key of a registry entry.
///
/// Declared tasks are keyed by value, persisted ones by database id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKey {
    Declared {
        name: String,
        target: String,
        params: String,
    },
    Persisted(i64),
}

/// A task declared in code or configuration, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredTask {
    pub name: String,
    /// `module.symbol` of the function to run.
    pub target: String,
    #[serde(default)]
    pub params: Params,
}

impl DeclaredTask {
    pub fn new(name: impl Into<String>, target: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            params,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::Declared {
            name: self.name.clone(),
            target: self.target.clone(),
            params: canonical_params(&self.params),
        }
    }

    /// Name of the schedule record managed for this task.
    pub fn schedule_name(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.name)
    }

    pub fn to_schedule_fields(&self, suffix: &str) -> ScheduleFields {
        ScheduleFields {
            name: self.schedule_name(suffix),
            func: self.target.clone(),
            params: self.params.clone(),
        }
    }

    /// Flattened view: `name`, `func`, then every param.
    ///
    /// A param named `name` or `func` never shadows the task's own name or
    /// target. It stays in [`DeclaredTask::params`] and reaches the schedule
    /// record unchanged.
    pub fn to_map(&self) -> Params {
        flatten(&self.name, &self.target, &self.params)
    }
}

impl Hash for DeclaredTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// A task record stored in the database.
///
/// Two records are the same task iff they have the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTask {
    pub id: i64,
    pub name: String,
    pub target: String,
    #[serde(default)]
    pub params: Params,
    pub schedule_id: Option<i64>,
}

impl PartialEq for PersistedTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PersistedTask {}

impl Hash for PersistedTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// An entry of the task registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Task {
    Declared(DeclaredTask),
    Persisted(PersistedTask),
}

impl Task {
    pub fn key(&self) -> TaskKey {
        match self {
            Self::Declared(task) => task.key(),
            Self::Persisted(task) => TaskKey::Persisted(task.id),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Declared(task) => &task.name,
            Self::Persisted(task) => &task.name,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Declared(task) => &task.target,
            Self::Persisted(task) => &task.target,
        }
    }

    pub fn params(&self) -> &Params {
        match self {
            Self::Declared(task) => &task.params,
            Self::Persisted(task) => &task.params,
        }
    }

    /// Database identity, if the entry has one.
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Declared(_) => None,
            Self::Persisted(task) => Some(task.id),
        }
    }

    /// Flattened view: `name`, `func`, every param, and `id` when persisted.
    pub fn to_map(&self) -> Params {
        let mut map = flatten(self.name(), self.target(), self.params());
        if let Some(id) = self.id() {
            map.insert("id".into(), Value::from(id));
        }
        map
    }
}

impl From<DeclaredTask> for Task {
    fn from(task: DeclaredTask) -> Self {
        Self::Declared(task)
    }
}

impl From<PersistedTask> for Task {
    fn from(task: PersistedTask) -> Self {
        Self::Persisted(task)
    }
}

/// Keys of the flattened view owned by the task itself.
pub const RESERVED_KEYS: [&str; 2] = ["name", "func"];

fn flatten(name: &str, target: &str, params: &Params) -> Params {
    let mut map = params.clone();
    map.insert("name".into(), Value::from(name));
    map.insert("func".into(), Value::from(target));
    map
}

/// Fields written to a schedule record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFields {
    /// Task name plus the namespacing suffix.
    pub name: String,
    pub func: String,
    #[serde(default)]
    pub params: Params,
}

/// A schedule record owned by the external scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    pub func: String,
    #[serde(default)]
    pub params: Params,
}

impl Schedule {
    pub fn from_fields(id: i64, fields: &ScheduleFields) -> Self {
        Self {
            id,
            name: fields.name.clone(),
            func: fields.func.clone(),
            params: fields.params.clone(),
        }
    }
}
