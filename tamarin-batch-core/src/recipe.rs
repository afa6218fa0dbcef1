//! Recipe Model (spec component A).
//!
//! Validated in-memory representation of a recipe: global resource
//! ceilings, prover aliases, and the tasks that bind a theory file to a
//! list of aliases with optional lemma filters and resource overrides.
//! The recipe is immutable after load; no filesystem access happens here
//! beyond reading the recipe file itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Failure while loading or validating a recipe file.
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("failed to read recipe file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed recipe JSON at line {line}, column {column}: {message}\n{context}")]
    Malformed {
        line: usize,
        column: usize,
        message: String,
        context: String,
    },

    #[error("{field_path}: invalid name '{name}', must match ^[A-Za-z][A-Za-z0-9_-]*$")]
    InvalidName { field_path: String, name: String },

    #[error("{field_path}: {message}")]
    InvalidField { field_path: String, message: String },

    #[error("{field_path}: unknown key '{key}'\n{context}")]
    UnknownKey {
        field_path: String,
        key: String,
        context: String,
    },

    #[error("task '{task}' references undefined alias '{alias}'")]
    UndefinedAlias { task: String, alias: String },
}

/// `global_max_cores` / `global_max_memory_gb`: integer, `"max"`, or `"N%"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimit {
    Count(u32),
    Max,
    Percent(u8),
}

impl ResourceLimit {
    fn parse(field_path: &str, raw: &RawLimitValue) -> Result<Self, RecipeError> {
        match raw {
            RawLimitValue::Int(n) => {
                if *n == 0 {
                    return Err(RecipeError::InvalidField {
                        field_path: field_path.to_string(),
                        message: "must be a positive integer".to_string(),
                    });
                }
                Ok(ResourceLimit::Count(*n))
            }
            RawLimitValue::Str(s) if s == "max" => Ok(ResourceLimit::Max),
            RawLimitValue::Str(s) if s.ends_with('%') => {
                let digits = &s[..s.len() - 1];
                let pct: u8 = digits.parse().map_err(|_| RecipeError::InvalidField {
                    field_path: field_path.to_string(),
                    message: format!("'{s}' is not a valid percentage"),
                })?;
                if !(1..=100).contains(&pct) {
                    return Err(RecipeError::InvalidField {
                        field_path: field_path.to_string(),
                        message: format!("percentage {pct} out of range 1..=100"),
                    });
                }
                Ok(ResourceLimit::Percent(pct))
            }
            RawLimitValue::Str(s) => Err(RecipeError::InvalidField {
                field_path: field_path.to_string(),
                message: format!("'{s}' must be an integer, \"max\", or \"N%\""),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLimitValue {
    Int(u32),
    Str(String),
}

/// A prover executable bound to a symbolic alias, plus what was learned
/// about it at load time (best-effort, never fatal on failure).
#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub executable_path: PathBuf,
    pub reported_version: Option<String>,
    pub integrity_ok: Option<bool>,
}

/// Per-task or per-lemma resource overrides (§3 inheritance contract).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceOverrides {
    pub max_cores: Option<u32>,
    pub max_memory: Option<u32>,
    pub timeout: Option<u32>,
}

/// A user-provided filter selecting a subset of a theory's lemmas by
/// substring, optionally overriding inherited parameters wholesale.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LemmaSpec {
    pub name: String,
    #[serde(default)]
    pub tamarin_versions: Option<Vec<String>>,
    #[serde(default)]
    pub tamarin_options: Option<Vec<String>>,
    #[serde(default)]
    pub preprocess_flags: Option<Vec<String>>,
    #[serde(default)]
    pub resources: Option<ResourceOverrides>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub theory_file: PathBuf,
    pub tamarin_versions: Vec<String>,
    pub output_file_prefix: String,
    #[serde(default)]
    pub lemmas: Option<Vec<LemmaSpec>>,
    #[serde(default)]
    pub tamarin_options: Option<Vec<String>>,
    #[serde(default)]
    pub preprocess_flags: Option<Vec<String>>,
    #[serde(default)]
    pub resources: Option<ResourceOverrides>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAliasEntry {
    path: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    test_success: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    global_max_cores: RawLimitValue,
    global_max_memory: RawLimitValue,
    default_timeout: u32,
    output_directory: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecipe {
    config: RawConfig,
    tamarin_versions: BTreeMap<String, RawAliasEntry>,
    tasks: BTreeMap<String, Task>,
}

/// Validated, immutable recipe. Constructed only via [`Recipe::load`] /
/// [`Recipe::from_str`]; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub global_max_cores: ResourceLimit,
    pub global_max_memory_gb: ResourceLimit,
    pub default_timeout_s: u32,
    pub output_directory: PathBuf,
    pub aliases: BTreeMap<String, AliasEntry>,
    pub tasks: BTreeMap<String, Task>,
}

fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A ±3-line window of `source` centered on `line` (1-indexed), used to
/// surface context for configuration errors.
fn context_window(source: &str, line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let start = line.saturating_sub(4);
    let end = (line + 3).min(lines.len());
    let mut out = String::new();
    for (idx, text) in lines.iter().enumerate().take(end).skip(start) {
        let lineno = idx + 1;
        let marker = if lineno == line { ">" } else { " " };
        out.push_str(&format!("{marker} {lineno:>5} | {text}\n"));
    }
    out
}

impl Recipe {
    /// Load and validate a recipe from a JSON file on disk.
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        let source = std::fs::read_to_string(path).map_err(|e| RecipeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_str(&source)
    }

    /// Parse and validate a recipe from an in-memory JSON string.
    pub fn from_str(source: &str) -> Result<Self, RecipeError> {
        let raw: RawRecipe = serde_json::from_str(source).map_err(|e| {
            let line = e.line();
            let column = e.column();
            let message = e.to_string();
            if let Some(key) = extract_unknown_field(&message) {
                RecipeError::UnknownKey {
                    field_path: "<recipe>".to_string(),
                    key,
                    context: context_window(source, line),
                }
            } else {
                RecipeError::Malformed {
                    line,
                    column,
                    message,
                    context: context_window(source, line),
                }
            }
        })?;

        let global_max_cores =
            ResourceLimit::parse("config.global_max_cores", &raw.config.global_max_cores)?;
        let global_max_memory_gb =
            ResourceLimit::parse("config.global_max_memory", &raw.config.global_max_memory)?;

        if raw.config.default_timeout == 0 {
            return Err(RecipeError::InvalidField {
                field_path: "config.default_timeout".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        let mut aliases = BTreeMap::new();
        for (name, entry) in raw.tamarin_versions {
            if !is_valid_name(&name) {
                return Err(RecipeError::InvalidName {
                    field_path: "tamarin_versions".to_string(),
                    name,
                });
            }
            aliases.insert(
                name,
                AliasEntry {
                    executable_path: PathBuf::from(entry.path),
                    reported_version: entry.version,
                    integrity_ok: entry.test_success,
                },
            );
        }

        for (task_name, task) in &raw.tasks {
            if !is_valid_name(task_name) {
                return Err(RecipeError::InvalidName {
                    field_path: "tasks".to_string(),
                    name: task_name.clone(),
                });
            }
            if task.tamarin_versions.is_empty() {
                return Err(RecipeError::InvalidField {
                    field_path: format!("tasks.{task_name}.tamarin_versions"),
                    message: "must name at least one alias".to_string(),
                });
            }
            for alias in &task.tamarin_versions {
                if !aliases.contains_key(alias) {
                    return Err(RecipeError::UndefinedAlias {
                        task: task_name.clone(),
                        alias: alias.clone(),
                    });
                }
            }
            if let Some(lemmas) = &task.lemmas {
                for lemma in lemmas {
                    if let Some(lemma_aliases) = &lemma.tamarin_versions {
                        for alias in lemma_aliases {
                            if !aliases.contains_key(alias) {
                                return Err(RecipeError::UndefinedAlias {
                                    task: task_name.clone(),
                                    alias: alias.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }

        Ok(Recipe {
            global_max_cores,
            global_max_memory_gb,
            default_timeout_s: raw.config.default_timeout,
            output_directory: PathBuf::from(raw.config.output_directory),
            aliases,
            tasks: raw.tasks,
        })
    }
}

/// Best-effort extraction of the offending key name from serde_json's
/// "unknown field `x`, expected ..." message.
fn extract_unknown_field(message: &str) -> Option<String> {
    let marker = "unknown field `";
    let start = message.find(marker)? + marker.len();
    let rest = &message[start..];
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"{
            "config": {
                "global_max_cores": 4,
                "global_max_memory": "80%",
                "default_timeout": 3600,
                "output_directory": "./output"
            },
            "tamarin_versions": {
                "stable": { "path": "tamarin-prover" }
            },
            "tasks": {
                "auth": {
                    "theory_file": "protocols/auth.spthy",
                    "tamarin_versions": ["stable"],
                    "output_file_prefix": "auth"
                }
            }
        }"#
    }

    #[test]
    fn parses_valid_recipe() {
        let recipe = Recipe::from_str(sample()).unwrap();
        assert_eq!(recipe.global_max_cores, ResourceLimit::Count(4));
        assert_eq!(recipe.global_max_memory_gb, ResourceLimit::Percent(80));
        assert!(recipe.aliases.contains_key("stable"));
        assert!(recipe.tasks.contains_key("auth"));
    }

    #[test]
    fn rejects_unknown_key() {
        let bad = sample().replace("\"default_timeout\"", "\"default_timeout_typo\"");
        let err = Recipe::from_str(&bad).unwrap_err();
        assert!(matches!(err, RecipeError::UnknownKey { .. }));
    }

    #[test]
    fn rejects_invalid_task_name() {
        let bad = sample().replace("\"auth\"", "\"9auth\"");
        let err = Recipe::from_str(&bad).unwrap_err();
        assert!(matches!(err, RecipeError::InvalidName { .. }));
    }

    #[test]
    fn rejects_undefined_alias() {
        let bad = sample().replace("\"stable\"]", "\"ghost\"]");
        let err = Recipe::from_str(&bad).unwrap_err();
        assert!(matches!(err, RecipeError::UndefinedAlias { .. }));
    }

    #[test]
    fn rejects_out_of_range_percent() {
        let bad = sample().replace("\"80%\"", "\"150%\"");
        let err = Recipe::from_str(&bad).unwrap_err();
        assert!(matches!(err, RecipeError::InvalidField { .. }));
    }

    #[test]
    fn name_pattern_rejects_bad_chars() {
        assert!(is_valid_name("abc_123-def"));
        assert!(!is_valid_name("1abc"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("ab c"));
    }
}
