//! Task functions and the catalog that resolves `module.symbol` paths.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde_json::Value;

use crate::{Error, Result, types::Params};

/// Signature of a schedulable function.
pub type TaskFn = Arc<dyn Fn(&Params) -> Result<Value> + Send + Sync>;

/// A named, schedulable function.
///
/// Cloning is cheap and every clone calls the same underlying function.
#[derive(Clone)]
pub struct TaskFunction {
    module: String,
    name: String,
    func: TaskFn,
}

impl TaskFunction {
    /// Wrap `func` under an explicit `module` and `name`.
    ///
    /// `module` may use either `::` or `.` as separator.
    pub fn new<F>(module: impl Into<String>, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Params) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            module: module.into().replace("::", "."),
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Wrap a function item, taking its module and name from its Rust path.
    ///
    /// `fn send_report` in `app::jobs` becomes `app.jobs.send_report`.
    /// Closures have no path of their own and are rejected; wrap them with
    /// [`TaskFunction::new`] instead.
    pub fn from_fn<F>(func: F) -> Result<Self>
    where
        F: Fn(&Params) -> Result<Value> + Send + Sync + 'static,
    {
        let type_path = std::any::type_name::<F>();
        let (module, name) = split_type_path(type_path).ok_or_else(|| {
            Error::type_mismatch(
                type_path,
                "only named function items can be registered without an explicit name",
            )
        })?;
        Ok(Self::new(module, name, func))
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified `module.symbol` reference.
    pub fn target(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// Call the wrapped function. Its result, including any error, is
    /// returned unchanged.
    pub fn call(&self, args: &Params) -> Result<Value> {
        (self.func)(args)
    }
}

impl fmt::Debug for TaskFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFunction")
            .field("target", &self.target())
            .finish_non_exhaustive()
    }
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn split_type_path(path: &str) -> Option<(String, String)> {
    let (module, name) = path.rsplit_once("::")?;
    if !is_identifier(name) || !module.split("::").all(is_identifier) {
        return None;
    }
    Some((module.replace("::", "."), name.to_string()))
}

/// The functions this process can schedule, keyed by `module.symbol`.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    functions: BTreeMap<String, TaskFunction>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function, replacing any previous one with the same target.
    pub fn insert(&mut self, function: TaskFunction) -> Option<TaskFunction> {
        self.functions.insert(function.target(), function)
    }

    /// Builder form of [`FunctionCatalog::insert`].
    #[must_use]
    pub fn with(mut self, function: TaskFunction) -> Self {
        self.insert(function);
        self
    }

    /// Resolve a `module.symbol` path.
    pub fn resolve(&self, path: &str) -> Result<TaskFunction> {
        let Some((module, symbol)) = path
            .rsplit_once('.')
            .filter(|(module, symbol)| !module.is_empty() && !symbol.is_empty())
        else {
            return Err(Error::import_failure(path, "expected a \"module.symbol\" path"));
        };

        if let Some(function) = self.functions.get(path) {
            return Ok(function.clone());
        }

        if self.functions.values().any(|f| f.module() == module) {
            Err(Error::import_failure(
                path,
                format!("module {module} has no function {symbol}"),
            ))
        } else {
            Err(Error::import_failure(path, format!("no module named {module}")))
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.functions.contains_key(path)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
