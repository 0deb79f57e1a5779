//! Configuration validation.
//!
//! Checks a config document for syntax errors, unknown or misspelled keys,
//! and declarations the registry would reject at startup.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use crate::schema::{LEGACY_SUFFIX, QRegistryConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "suffix", "target",
    /// "duplicate", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "registry.tasks[0].func"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Expected shape of the configuration document.
enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Array whose items are free-form tables (static task declarations).
    OpenArray,
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, OpenArray, Struct};

    Struct(HashMap::from([
        (
            "registry",
            Struct(HashMap::from([
                ("suffix", Leaf),
                ("periodic_task_suffix", Leaf),
                ("tasks", OpenArray),
                ("static_tasks", OpenArray),
            ])),
        ),
        ("database", Struct(HashMap::from([("url", Leaf)]))),
    ]))
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(actual_path) {
        Ok(content) => validate_str(
            &crate::env_subst::substitute_env(&content),
            actual_path,
        ),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path.clone());
    result
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    validate_str(toml_str, Path::new("qregistry.toml"))
}

/// Validate a document whose format is inferred from `path`'s extension.
fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match crate::loader::parse_config_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    // 3. Types, then semantics on the parsed config
    match serde_json::from_value::<QRegistryConfig>(value) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "unknown-field",
                    path,
                    message,
                });
            },
        }
    }
}

fn check_semantics(config: &QRegistryConfig, diagnostics: &mut Vec<Diagnostic>) {
    let suffix = &config.registry.suffix;
    if suffix.is_empty() {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "suffix",
            path: "registry.suffix".into(),
            message: "suffix must not be empty; every suffixed schedule would match".into(),
        });
    } else if suffix.ends_with(LEGACY_SUFFIX) {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "suffix",
            path: "registry.suffix".into(),
            message: format!("suffix must not end with the legacy suffix \"{LEGACY_SUFFIX}\""),
        });
    }

    let mut seen_names = HashSet::new();
    for (i, task) in config.registry.tasks.iter().enumerate() {
        let path = format!("registry.tasks[{i}]");
        let Some(func) = task.func.as_str() else {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "type-error",
                path: format!("{path}.func"),
                message: format!("func must be a \"module.symbol\" string, got {}", task.func),
            });
            continue;
        };
        let Some((module, symbol)) = func.rsplit_once('.') else {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "target",
                path: format!("{path}.func"),
                message: format!("\"{func}\" is not a \"module.symbol\" path"),
            });
            continue;
        };
        if module.is_empty() || symbol.is_empty() {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "target",
                path: format!("{path}.func"),
                message: format!("\"{func}\" has an empty module or symbol"),
            });
            continue;
        }

        let name = task.name.as_deref().unwrap_or(symbol);
        if name.is_empty() {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "target",
                path: format!("{path}.name"),
                message: "name must not be empty".into(),
            });
        } else if !seen_names.insert(name.to_string()) {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: "duplicate",
                path: format!("{path}.name"),
                message: format!(
                    "task name \"{name}\" is declared more than once; the persisted record keeps the last one"
                ),
            });
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn find<'a>(result: &'a ValidationResult, category: &str) -> Option<&'a Diagnostic> {
        result.diagnostics.iter().find(|d| d.category == category)
    }

    #[rstest]
    #[case("server", "sever", 1)]
    #[case("registry", "registy", 1)]
    #[case("", "abc", 3)]
    #[case("cat", "car", 1)]
    #[case("same", "same", 0)]
    fn levenshtein_distances(#[case] a: &str, #[case] b: &str, #[case] expected: usize) {
        assert_eq!(levenshtein(a, b), expected);
    }

    #[test]
    fn valid_config_has_no_diagnostics() {
        let result = validate_toml_str(
            r#"
[registry]
suffix = " - QREGISTRY"

[[registry.tasks]]
func = "app.jobs.send_report"
cron = "0 9 * * *"

[database]
url = "sqlite::memory:"
"#,
        );
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn syntax_error() {
        let result = validate_toml_str("[registry\n");
        assert!(result.has_errors());
        assert!(find(&result, "syntax").is_some());
    }

    #[test]
    fn unknown_top_level_key_with_suggestion() {
        let result = validate_toml_str("[registy]\nsuffix = \" - X\"\n");
        let d = find(&result, "unknown-field").unwrap();
        assert_eq!(d.path, "registy");
        assert!(d.message.contains("\"registry\""));
    }

    #[test]
    fn unknown_nested_key() {
        let result = validate_toml_str("[database]\nurll = \"sqlite::memory:\"\n");
        let d = find(&result, "unknown-field").unwrap();
        assert_eq!(d.path, "database.urll");
    }

    #[test]
    fn task_params_are_open() {
        let result = validate_toml_str(
            "[[registry.tasks]]\nfunc = \"m.f\"\nanything_goes = 1\n",
        );
        assert!(find(&result, "unknown-field").is_none());
    }

    #[rstest]
    #[case("")]
    #[case(" - CRON")]
    #[case("x - CRON")]
    fn rejected_suffixes(#[case] suffix: &str) {
        let result = validate_toml_str(&format!("[registry]\nsuffix = \"{suffix}\"\n"));
        let d = find(&result, "suffix").unwrap();
        assert_eq!(d.severity, Severity::Error);
    }

    #[test]
    fn non_string_func() {
        let result = validate_toml_str("[[registry.tasks]]\nfunc = 5\n");
        let d = find(&result, "type-error").unwrap();
        assert_eq!(d.path, "registry.tasks[0].func");
    }

    #[rstest]
    #[case("test_task")]
    #[case(".f")]
    #[case("m.")]
    fn malformed_targets(#[case] func: &str) {
        let result = validate_toml_str(&format!("[[registry.tasks]]\nfunc = \"{func}\"\n"));
        assert!(find(&result, "target").is_some());
    }

    #[test]
    fn duplicate_names_warn() {
        let result = validate_toml_str(
            r#"
[[registry.tasks]]
func = "a.ping"

[[registry.tasks]]
func = "b.ping"
"#,
        );
        let d = find(&result, "duplicate").unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn validate_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qregistry.json");
        std::fs::write(&path, r#"{"registry": {"suffix": ""}}"#).unwrap();
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert!(result.has_errors());
    }

    #[test]
    fn validate_missing_file() {
        let result = validate(Some(Path::new("/nonexistent/qregistry.toml")));
        assert!(result.has_errors());
    }
}
