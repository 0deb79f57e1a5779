//! The declaration registry: the set of tasks this process wants scheduled.

use std::collections::BTreeMap;

use {
    qregistry_config::StaticTask,
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    function::{FunctionCatalog, TaskFunction},
    types::{DeclaredTask, Params, RESERVED_KEYS, Task, TaskKey},
};

/// Name and schedule parameters for one registration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOptions {
    /// Defaults to the function's own name.
    pub name: Option<String>,
    pub params: Params,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set one scheduler field or call argument.
    ///
    /// `name` and `func` are kept as params but never replace the task's
    /// name or target in [`TaskRegistry::iter`]. Use [`TaskOptions::name`]
    /// to rename a task.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }
}

impl From<&StaticTask> for TaskOptions {
    fn from(entry: &StaticTask) -> Self {
        Self {
            name: entry.name.clone(),
            params: entry.params.clone(),
        }
    }
}

/// Set of registry entries. Identical declarations collapse into one.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskKey, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding the static tasks of `config`.
    pub fn from_config(
        config: &qregistry_config::RegistryConfig,
        catalog: &FunctionCatalog,
    ) -> Result<Self> {
        let mut registry = Self::new();
        registry.load_static_configuration(catalog, &config.tasks)?;
        Ok(registry)
    }

    /// Register `function` and hand it back unchanged.
    ///
    /// ```ignore
    /// let send_report = registry.register(
    ///     TaskFunction::from_fn(send_report)?,
    ///     TaskOptions::new().param("schedule_type", "C").param("cron", "0 9 * * *"),
    /// );
    /// send_report.call(&args)?;
    /// ```
    pub fn register(&mut self, function: TaskFunction, options: TaskOptions) -> TaskFunction {
        let task = DeclaredTask::new(
            options.name.unwrap_or_else(|| function.name().to_string()),
            function.target(),
            options.params,
        );
        for key in RESERVED_KEYS {
            if task.params.contains_key(key) {
                warn!(name = %task.name, key, "param is shadowed by the task's own field");
            }
        }
        debug!(name = %task.name, target = %task.target, "registered task");
        self.add(task);
        function
    }

    /// Register a function item, deriving its target from its Rust path.
    pub fn register_fn<F>(&mut self, func: F, options: TaskOptions) -> Result<TaskFunction>
    where
        F: Fn(&Params) -> Result<Value> + Send + Sync + 'static,
    {
        Ok(self.register(TaskFunction::from_fn(func)?, options))
    }

    /// Register the function a `module.symbol` path resolves to.
    pub fn register_path(
        &mut self,
        catalog: &FunctionCatalog,
        path: &str,
        options: TaskOptions,
    ) -> Result<TaskFunction> {
        let function = catalog.resolve(path)?;
        Ok(self.register(function, options))
    }

    /// Register a dynamically typed target, as found in configuration.
    ///
    /// Strings are resolved through `catalog`; anything else is rejected.
    pub fn register_value(
        &mut self,
        catalog: &FunctionCatalog,
        target: &Value,
        options: TaskOptions,
    ) -> Result<TaskFunction> {
        match target {
            Value::String(path) => self.register_path(catalog, path, options),
            other => Err(Error::type_mismatch(
                other.to_string(),
                format!(
                    "expected a \"module.symbol\" string, got {}",
                    json_type_name(other)
                ),
            )),
        }
    }

    /// Register every static declaration, stopping at the first invalid one.
    pub fn load_static_configuration(
        &mut self,
        catalog: &FunctionCatalog,
        entries: &[StaticTask],
    ) -> Result<()> {
        for entry in entries {
            self.register_value(catalog, &entry.func, TaskOptions::from(entry))?;
        }
        debug!(count = entries.len(), "loaded static tasks");
        Ok(())
    }

    /// Insert an entry. Returns `false` when an equal entry was already
    /// present (it is replaced).
    pub fn add(&mut self, task: impl Into<Task>) -> bool {
        let task = task.into();
        self.tasks.insert(task.key(), task).is_none()
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.tasks.contains_key(&task.key())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// One flattened mapping per entry: `name`, `func` and the params.
    /// The entry's own name and target win over params with those keys.
    ///
    /// Iterating again yields the same sequence as long as the registry is
    /// not modified.
    pub fn iter(&self) -> impl Iterator<Item = Params> {
        self.tasks.values().map(Task::to_map)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

impl FromIterator<Task> for TaskRegistry {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        let mut registry = Self::new();
        for task in iter {
            registry.add(task);
        }
        registry
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::PersistedTask,
        qregistry_config::{QRegistryConfig, RegistryConfig},
        serde_json::json,
    };

    fn test_task(_: &Params) -> Result<Value> {
        Ok(json!("test"))
    }

    fn echo(args: &Params) -> Result<Value> {
        args.get("arg")
            .cloned()
            .ok_or_else(|| Error::message("missing arg"))
    }

    fn catalog() -> FunctionCatalog {
        FunctionCatalog::new()
            .with(TaskFunction::from_fn(test_task).unwrap())
            .with(TaskFunction::new("app.mail", "send_mail", echo))
    }

    fn test_task_target() -> String {
        TaskFunction::from_fn(test_task).unwrap().target()
    }

    #[test]
    fn decoration() {
        let mut registry = TaskRegistry::new();
        registry
            .register_fn(test_task, TaskOptions::new().name("test_task"))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn function_call_form() {
        let mut registry = TaskRegistry::new();
        registry.register(
            TaskFunction::new("app.mail", "send_mail", echo),
            TaskOptions::new().name("Send periodic test email"),
        );
        let task = registry.tasks().next().unwrap();
        assert_eq!(task.name(), "Send periodic test email");
        assert_eq!(task.target(), "app.mail.send_mail");
    }

    #[test]
    fn registered_function_stays_callable() {
        let mut registry = TaskRegistry::new();
        let task = registry.register_fn(test_task, TaskOptions::new()).unwrap();
        assert_eq!(task.call(&Params::new()).unwrap(), json!("test"));
        assert_eq!(task.name(), "test_task");
    }

    #[test]
    fn registered_function_keeps_args_and_errors() {
        let mut registry = TaskRegistry::new();
        let task = registry.register(
            TaskFunction::new("app.mail", "send_mail", echo),
            TaskOptions::new(),
        );
        let mut args = Params::new();
        args.insert("arg".into(), json!("test"));
        assert_eq!(task.call(&args).unwrap(), json!("test"));
        let err = task.call(&Params::new()).unwrap_err();
        assert_eq!(err.to_string(), "missing arg");
    }

    #[test]
    fn name_defaults_to_function_name() {
        let mut registry = TaskRegistry::new();
        registry.register_fn(test_task, TaskOptions::new()).unwrap();
        let tasks: Vec<&Task> = registry.tasks().collect();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name(), "test_task");
        assert_eq!(tasks[0].target(), test_task_target());
    }

    #[test]
    fn duplicates_collapse() {
        let mut registry = TaskRegistry::new();
        let f = TaskFunction::new("m", "f", test_task);
        let g = TaskFunction::new("m", "g", test_task);
        registry.register(f.clone(), TaskOptions::new().name("t"));
        registry.register(f, TaskOptions::new().name("t"));
        registry.register(g, TaskOptions::new().name("u").param("x", 1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn different_params_do_not_collapse() {
        let mut registry = TaskRegistry::new();
        let f = TaskFunction::new("m", "f", test_task);
        registry.register(f.clone(), TaskOptions::new().param("foo", "bar"));
        registry.register(f, TaskOptions::new().param("baz", "qux"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn nested_kwargs_and_scheduler_fields() {
        let mut registry = TaskRegistry::new();
        registry.register(
            TaskFunction::new("app.mail", "send_mail", echo),
            TaskOptions::new()
                .name("Send periodic test email")
                .param("next_run", "2026-10-17T09:00:00Z")
                .param("schedule_type", "I")
                .param("minutes", 5)
                .param(
                    "kwargs",
                    json!({
                        "subject": "Test email from reminders",
                        "recipient_list": ["to@example.com"],
                    }),
                ),
        );
        assert_eq!(registry.len(), 1);

        let expected = Task::from(DeclaredTask::new(
            "Send periodic test email",
            "app.mail.send_mail",
            json!({
                "next_run": "2026-10-17T09:00:00Z",
                "schedule_type": "I",
                "minutes": 5,
                "kwargs": {
                    "recipient_list": ["to@example.com"],
                    "subject": "Test email from reminders",
                },
            })
            .as_object()
            .cloned()
            .unwrap(),
        ));
        assert!(registry.contains(&expected));
    }

    #[test]
    fn register_path_resolves() {
        let mut registry = TaskRegistry::new();
        let f = registry
            .register_path(&catalog(), "app.mail.send_mail", TaskOptions::new())
            .unwrap();
        assert_eq!(f.target(), "app.mail.send_mail");
        assert_eq!(registry.tasks().next().unwrap().name(), "send_mail");
    }

    #[test]
    fn value_that_is_not_a_string() {
        let mut registry = TaskRegistry::new();
        let err = registry
            .register_value(&catalog(), &json!(5), TaskOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn string_without_module() {
        let mut registry = TaskRegistry::new();
        let err = registry
            .register_value(&catalog(), &json!("test_task"), TaskOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::ImportFailure { .. }));
    }

    #[test]
    fn string_naming_a_module() {
        let mut registry = TaskRegistry::new();
        let err = registry
            .register_path(&catalog(), "app.mail", TaskOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::ImportFailure { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn static_configuration() {
        let config: QRegistryConfig = serde_json::from_value(json!({
            "registry": {
                "tasks": [
                    { "func": "app.mail.send_mail", "name": "Task from settings", "minutes": 5 },
                    { "func": "app.mail.send_mail" },
                ]
            }
        }))
        .unwrap();
        let registry = TaskRegistry::from_config(&config.registry, &catalog()).unwrap();
        assert_eq!(registry.len(), 2);

        let names: Vec<&str> = registry.tasks().map(Task::name).collect();
        assert!(names.contains(&"Task from settings"));
        assert!(names.contains(&"send_mail"));
    }

    #[test]
    fn static_configuration_fails_fast() {
        let config = RegistryConfig {
            tasks: vec![
                StaticTask {
                    func: json!("app.mail.send_mail"),
                    name: None,
                    params: Params::new(),
                },
                StaticTask {
                    func: json!("app.mail.unknown"),
                    name: None,
                    params: Params::new(),
                },
            ],
            ..RegistryConfig::default()
        };
        let err = TaskRegistry::from_config(&config, &catalog()).unwrap_err();
        assert!(matches!(err, Error::ImportFailure { .. }));
    }

    #[test]
    fn iteration_is_restartable() {
        let mut registry = TaskRegistry::new();
        registry.register(
            TaskFunction::new("m", "f", test_task),
            TaskOptions::new().name("t").param("cron", "*/5 * * * *"),
        );
        registry.register(TaskFunction::new("m", "g", test_task), TaskOptions::new());

        let first: Vec<Params> = registry.iter().collect();
        let second: Vec<Params> = registry.iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);

        let t = first.iter().find(|m| m["name"] == "t").unwrap();
        assert_eq!(t["func"], "m.f");
        assert_eq!(t["cron"], "*/5 * * * *");
    }

    #[test]
    fn reserved_params_do_not_shadow_identity() {
        let mut registry = TaskRegistry::new();
        registry.register(
            TaskFunction::new("m", "f", test_task),
            TaskOptions::new()
                .name("t")
                .param("name", "impostor")
                .param("func", "m.g"),
        );

        let maps: Vec<Params> = registry.iter().collect();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0]["name"], "t");
        assert_eq!(maps[0]["func"], "m.f");

        let Some(Task::Declared(task)) = registry.tasks().next() else {
            panic!("expected a declared task");
        };
        assert_eq!(task.params["name"], "impostor");
        assert_eq!(task.params["func"], "m.g");
    }

    #[test]
    fn persisted_entries_are_kept_apart() {
        let registry: TaskRegistry = [
            Task::from(DeclaredTask::new("t", "m.f", Params::new())),
            Task::from(PersistedTask {
                id: 1,
                name: "t".into(),
                target: "m.f".into(),
                params: Params::new(),
                schedule_id: None,
            }),
        ]
        .into_iter()
        .collect();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn add_reports_replacement() {
        let mut registry = TaskRegistry::new();
        assert!(registry.add(DeclaredTask::new("t", "m.f", Params::new())));
        assert!(!registry.add(DeclaredTask::new("t", "m.f", Params::new())));
        registry.clear();
        assert!(registry.is_empty());
    }
}
