//! Assembles a batch's unit results into the JSON execution report a
//! caller persists to disk or prints to stdout.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parse::Verdict;
use crate::recipe::Recipe;
use crate::scheduler::{UnitResult, UnitStatus};

/// The batch's resolved global configuration, with every `"max"` / `"N%"`
/// limit already elaborated to a concrete integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub global_max_cores: u32,
    pub global_max_memory_gb: u32,
    pub default_timeout_s: u32,
    pub output_directory: PathBuf,
}

/// One entry in the report's alias table: where its prover lives and
/// what version it reported during preflight, if probed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportAliasEntry {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_version: Option<String>,
}

/// A single unit's resolved configuration, echoed back in the report so
/// a verdict can be read without cross-referencing the recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    pub alias: String,
    pub theory_file: PathBuf,
    pub lemma: String,
    pub cores: u32,
    pub memory_gb: u32,
    pub timeout_s: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitExecutionMetadata {
    pub command: Vec<String>,
    pub status: UnitStatus,
    pub cache_hit: bool,
    pub exec_start: DateTime<Utc>,
    pub exec_end: DateTime<Utc>,
    pub exec_duration_monotonic_s: f64,
    pub avg_memory_mb: f64,
    pub peak_memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub config: UnitConfig,
    pub execution_metadata: UnitExecutionMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub theory_file: PathBuf,
    pub subtasks: BTreeMap<String, UnitReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExecutionMetadata {
    pub total_tasks: usize,
    pub total_successes: usize,
    pub total_failures: usize,
    pub total_cache_hit: usize,
    pub total_runtime_s: f64,
    pub total_memory_mb: f64,
    pub max_runtime_s: f64,
    pub max_memory_mb: f64,
}

/// The full execution report for a batch run, matching the runner's
/// on-disk JSON output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub recipe_name: String,
    pub config: ResolvedConfig,
    pub aliases: BTreeMap<String, ReportAliasEntry>,
    pub execution_metadata: BatchExecutionMetadata,
    pub tasks: BTreeMap<String, TaskReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl UnitStatus {
    fn is_success(self) -> bool {
        matches!(self, UnitStatus::Completed)
    }
}

impl Batch {
    /// Build the report from the scheduler's raw results, grouped back
    /// under the original task each unit was expanded from.
    pub fn assemble(
        recipe_name: String,
        recipe: &Recipe,
        global_cores: u32,
        global_memory_gb: u32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<UnitResult>,
    ) -> Self {
        let config = ResolvedConfig {
            global_max_cores: global_cores,
            global_max_memory_gb: global_memory_gb,
            default_timeout_s: recipe.default_timeout_s,
            output_directory: recipe.output_directory.clone(),
        };

        let aliases = recipe
            .aliases
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    ReportAliasEntry {
                        path: entry.executable_path.clone(),
                        reported_version: entry.reported_version.clone(),
                    },
                )
            })
            .collect();

        let mut execution_metadata = BatchExecutionMetadata {
            total_tasks: results.len(),
            total_successes: 0,
            total_failures: 0,
            total_cache_hit: 0,
            total_runtime_s: 0.0,
            total_memory_mb: 0.0,
            max_runtime_s: 0.0,
            max_memory_mb: 0.0,
        };

        let mut tasks: BTreeMap<String, TaskReport> = BTreeMap::new();

        for result in results {
            if result.status.is_success() {
                execution_metadata.total_successes += 1;
            } else {
                execution_metadata.total_failures += 1;
            }
            if result.cache_hit {
                execution_metadata.total_cache_hit += 1;
            }
            execution_metadata.total_runtime_s += result.exec_duration_monotonic_s;
            execution_metadata.total_memory_mb += result.peak_memory_mb;
            execution_metadata.max_runtime_s = execution_metadata.max_runtime_s.max(result.exec_duration_monotonic_s);
            execution_metadata.max_memory_mb = execution_metadata.max_memory_mb.max(result.peak_memory_mb);

            let task_entry = tasks.entry(result.unit.task_name.clone()).or_insert_with(|| TaskReport {
                theory_file: result.unit.theory_file.clone(),
                subtasks: BTreeMap::new(),
            });

            let unit_report = UnitReport {
                config: UnitConfig {
                    alias: result.unit.alias.clone(),
                    theory_file: result.unit.theory_file.clone(),
                    lemma: result.unit.lemma_name.clone(),
                    cores: result.unit.max_cores,
                    memory_gb: result.unit.max_memory_gb,
                    timeout_s: result.unit.timeout_s,
                },
                execution_metadata: UnitExecutionMetadata {
                    command: result.command,
                    status: result.status,
                    cache_hit: result.cache_hit,
                    exec_start: result.exec_start,
                    exec_end: result.exec_end,
                    exec_duration_monotonic_s: result.exec_duration_monotonic_s,
                    avg_memory_mb: result.avg_memory_mb,
                    peak_memory_mb: result.peak_memory_mb,
                },
                verdict: Some(result.verdict),
            };
            task_entry.subtasks.insert(result.unit.unit_id.clone(), unit_report);
        }

        Batch {
            recipe_name,
            config,
            aliases,
            execution_metadata,
            tasks,
            started_at,
            finished_at,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Unit;
    use std::path::PathBuf;

    fn sample_unit(id: &str, task: &str) -> Unit {
        Unit {
            unit_id: id.to_string(),
            task_name: task.to_string(),
            alias: "stable".to_string(),
            executable_path: PathBuf::from("tamarin-prover"),
            theory_file: PathBuf::from(format!("{task}.spthy")),
            lemma_name: "secrecy".to_string(),
            tamarin_options: vec![],
            preprocess_flags: vec![],
            output_file_prefix: task.to_string(),
            max_cores: 1,
            max_memory_gb: 1,
            timeout_s: 60,
            output_file: PathBuf::from(format!("out/proofs/{id}.spthy")),
            traces_dir: PathBuf::from("out/traces"),
        }
    }

    fn recipe_with(task_names: &[&str]) -> Recipe {
        let tasks_json: Vec<String> = task_names
            .iter()
            .map(|t| {
                format!(
                    r#""{t}": {{ "theory_file": "{t}.spthy", "tamarin_versions": ["stable"], "output_file_prefix": "{t}" }}"#
                )
            })
            .collect();
        let json = format!(
            r#"{{
                "config": {{
                    "global_max_cores": 4,
                    "global_max_memory": 8,
                    "default_timeout": 3600,
                    "output_directory": "./out"
                }},
                "tamarin_versions": {{ "stable": {{ "path": "tamarin-prover" }} }},
                "tasks": {{ {} }}
            }}"#,
            tasks_json.join(",")
        );
        Recipe::from_str(&json).unwrap()
    }

    #[test]
    fn groups_units_under_their_task_and_aggregates_metadata() {
        let recipe = recipe_with(&["auth", "other"]);
        let started = Utc::now();
        let finished = started;
        let results = vec![
            UnitResult {
                unit: sample_unit("auth--secrecy--stable", "auth"),
                command: vec!["tamarin-prover".to_string()],
                verdict: Verdict::verified("secrecy"),
                status: UnitStatus::Completed,
                cache_hit: false,
                exec_start: started,
                exec_end: finished,
                exec_duration_monotonic_s: 1.0,
                avg_memory_mb: 50.0,
                peak_memory_mb: 100.0,
            },
            UnitResult {
                unit: sample_unit("other--secrecy--stable", "other"),
                command: vec!["tamarin-prover".to_string()],
                verdict: Verdict::falsified("secrecy", "trace found"),
                status: UnitStatus::Completed,
                cache_hit: true,
                exec_start: started,
                exec_end: finished,
                exec_duration_monotonic_s: 2.0,
                avg_memory_mb: 150.0,
                peak_memory_mb: 200.0,
            },
        ];

        let batch = Batch::assemble("demo".to_string(), &recipe, 4, 8, started, finished, results);
        assert_eq!(batch.recipe_name, "demo");
        assert_eq!(batch.execution_metadata.total_tasks, 2);
        assert_eq!(batch.execution_metadata.total_successes, 2);
        assert_eq!(batch.execution_metadata.total_cache_hit, 1);
        assert_eq!(batch.execution_metadata.total_memory_mb, 300.0);
        assert_eq!(batch.execution_metadata.max_memory_mb, 200.0);
        assert_eq!(batch.tasks.len(), 2);
        assert!(batch.tasks["auth"].subtasks.contains_key("auth--secrecy--stable"));
        assert!(batch.tasks["other"].subtasks.contains_key("other--secrecy--stable"));
    }
}
