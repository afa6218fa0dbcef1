//! Task expansion: turns a validated [`Recipe`] into the flat, ordered
//! list of [`Unit`]s a batch will actually run, resolving inheritance
//! (defaults, task overrides, lemma overrides) and lemma substring
//! selection along the way.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::lemma;
use crate::recipe::{LemmaSpec, Recipe, ResourceOverrides, Task};
use crate::unit::Unit;

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("task '{task}': failed to read theory file {path}: {source}")]
    TheoryFileUnreadable {
        task: String,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task '{task}': lemma filter '{pattern}' matched no lemma in {path}")]
    LemmaFilterNoMatch {
        task: String,
        pattern: String,
        path: std::path::PathBuf,
    },
}

/// Resolved numeric resource triple after applying one level of
/// inheritance.
#[derive(Debug, Clone, Copy)]
struct Resolved {
    cores: u32,
    memory_gb: u32,
    timeout_s: u32,
}

fn apply_overrides(base: Resolved, overrides: Option<&ResourceOverrides>) -> Resolved {
    let Some(overrides) = overrides else {
        return base;
    };
    Resolved {
        cores: overrides.max_cores.unwrap_or(base.cores),
        memory_gb: overrides.max_memory.unwrap_or(base.memory_gb),
        timeout_s: overrides.timeout.unwrap_or(base.timeout_s),
    }
}

fn cap_to_global(resolved: Resolved, global_cores: u32, global_memory_gb: u32) -> Resolved {
    Resolved {
        cores: resolved.cores.min(global_cores),
        memory_gb: resolved.memory_gb.min(global_memory_gb),
        timeout_s: resolved.timeout_s,
    }
}

/// Expand every task in `recipe` into its flat list of units, in
/// lexicographic task/alias/lemma order (the natural iteration order of
/// the recipe's `BTreeMap`s).
///
/// `global_cores` / `global_memory_gb` are the already-host-resolved
/// ceilings (see [`crate::resources::resolve_limit`]); every task-level
/// resolved resource triple is capped to them. Lemma-level overrides are
/// applied on top of the task-resolved triple without a further cap:
/// a `LemmaSpec` may explicitly escalate past the global ceiling.
pub fn expand(
    recipe: &Recipe,
    global_cores: u32,
    global_memory_gb: u32,
) -> Result<Vec<Unit>, ExpandError> {
    let defaults = Resolved {
        cores: global_cores,
        memory_gb: global_memory_gb,
        timeout_s: recipe.default_timeout_s,
    };

    let mut units = Vec::new();
    let mut id_counts: HashMap<String, u32> = HashMap::new();

    for (task_name, task) in &recipe.tasks {
        let task_resolved = cap_to_global(
            apply_overrides(defaults, task.resources.as_ref()),
            global_cores,
            global_memory_gb,
        );

        for alias in &task.tamarin_versions {
            let alias_entry = &recipe.aliases[alias];

            match &task.lemmas {
                None => {
                    let discovered = discover_for(task_name, task, &task.preprocess_flags)?;
                    for lemma in &discovered {
                        push_unit(
                            &mut units,
                            &mut id_counts,
                            task_name,
                            task,
                            alias,
                            alias_entry.executable_path.clone(),
                            lemma.name.clone(),
                            task.tamarin_options.clone().unwrap_or_default(),
                            task.preprocess_flags.clone().unwrap_or_default(),
                            task_resolved,
                            &recipe.output_directory,
                        );
                    }
                }
                Some(lemma_specs) => {
                    let discovered = discover_for(task_name, task, &task.preprocess_flags)?;
                    for spec in lemma_specs {
                        if spec_applies_to_alias(spec, alias) {
                            emit_for_lemma_spec(
                                &mut units,
                                &mut id_counts,
                                task_name,
                                task,
                                alias,
                                alias_entry.executable_path.clone(),
                                spec,
                                &discovered,
                                task_resolved,
                                &recipe.output_directory,
                            )?;
                        }
                    }
                }
            }
        }
    }

    Ok(units)
}

fn spec_applies_to_alias(spec: &LemmaSpec, alias: &str) -> bool {
    match &spec.tamarin_versions {
        Some(aliases) => aliases.iter().any(|a| a == alias),
        None => true,
    }
}

fn discover_for(
    task_name: &str,
    task: &Task,
    base_flags: &Option<Vec<String>>,
) -> Result<Vec<lemma::DiscoveredLemma>, ExpandError> {
    let source =
        std::fs::read_to_string(&task.theory_file).map_err(|e| ExpandError::TheoryFileUnreadable {
            task: task_name.to_string(),
            path: task.theory_file.clone(),
            source: e,
        })?;
    let flags = base_flags.clone().unwrap_or_default();
    Ok(lemma::discover(&source, &flags))
}

#[allow(clippy::too_many_arguments)]
fn emit_for_lemma_spec(
    units: &mut Vec<Unit>,
    id_counts: &mut HashMap<String, u32>,
    task_name: &str,
    task: &Task,
    alias: &str,
    executable_path: std::path::PathBuf,
    spec: &LemmaSpec,
    discovered: &[lemma::DiscoveredLemma],
    task_resolved: Resolved,
    output_directory: &Path,
) -> Result<(), ExpandError> {
    let matches: Vec<&lemma::DiscoveredLemma> = discovered
        .iter()
        .filter(|l| l.name.contains(&spec.name))
        .collect();

    if matches.is_empty() {
        return Err(ExpandError::LemmaFilterNoMatch {
            task: task_name.to_string(),
            pattern: spec.name.clone(),
            path: task.theory_file.clone(),
        });
    }

    // Lemma-level overrides are applied on top of the task-resolved
    // triple but are never re-capped: a LemmaSpec may explicitly
    // escalate a lemma past the task's (already globally capped)
    // ceiling.
    let lemma_resolved = apply_overrides(task_resolved, spec.resources.as_ref());

    let options = spec
        .tamarin_options
        .clone()
        .or_else(|| task.tamarin_options.clone())
        .unwrap_or_default();
    let flags = spec
        .preprocess_flags
        .clone()
        .or_else(|| task.preprocess_flags.clone())
        .unwrap_or_default();

    for lemma in matches {
        push_unit(
            units,
            id_counts,
            task_name,
            task,
            alias,
            executable_path.clone(),
            lemma.name.clone(),
            options.clone(),
            flags.clone(),
            lemma_resolved,
            output_directory,
        );
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn push_unit(
    units: &mut Vec<Unit>,
    id_counts: &mut HashMap<String, u32>,
    task_name: &str,
    task: &Task,
    alias: &str,
    executable_path: std::path::PathBuf,
    lemma_name: String,
    tamarin_options: Vec<String>,
    preprocess_flags: Vec<String>,
    resolved: Resolved,
    output_directory: &Path,
) {
    let base_id = format!("{}--{}--{}", task.output_file_prefix, lemma_name, alias);
    let unit_id = dedupe_id(id_counts, base_id);
    let output_file: PathBuf = output_directory
        .join("proofs")
        .join(format!("{unit_id}.spthy"));
    let traces_dir = output_directory.join("traces");

    units.push(Unit {
        unit_id,
        task_name: task_name.to_string(),
        alias: alias.to_string(),
        executable_path,
        theory_file: task.theory_file.clone(),
        lemma_name,
        tamarin_options,
        preprocess_flags,
        output_file_prefix: task.output_file_prefix.clone(),
        max_cores: resolved.cores,
        max_memory_gb: resolved.memory_gb,
        timeout_s: resolved.timeout_s,
        output_file,
        traces_dir,
    });
}

fn dedupe_id(id_counts: &mut HashMap<String, u32>, base_id: String) -> String {
    let count = id_counts.entry(base_id.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        base_id
    } else {
        format!("{base_id}_{count}")
    }
}

/// Resolves a task's theory file path relative to the recipe's own
/// directory when the recipe was loaded from a file, falling back to
/// the path as given when no base directory applies.
pub fn resolve_theory_path(recipe_dir: Option<&Path>, theory_file: &Path) -> std::path::PathBuf {
    match recipe_dir {
        Some(dir) if theory_file.is_relative() => dir.join(theory_file),
        _ => theory_file.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::Recipe;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn recipe_json(theory_path: &str, lemma_block: &str) -> String {
        format!(
            r#"{{
                "config": {{
                    "global_max_cores": 4,
                    "global_max_memory": 8,
                    "default_timeout": 3600,
                    "output_directory": "./out"
                }},
                "tamarin_versions": {{
                    "stable": {{ "path": "tamarin-prover" }}
                }},
                "tasks": {{
                    "auth": {{
                        "theory_file": "{theory_path}",
                        "tamarin_versions": ["stable"],
                        "output_file_prefix": "auth"
                        {lemma_block}
                    }}
                }}
            }}"#
        )
    }

    fn theory_file_with(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn discovers_one_unit_per_lemma_without_filter() {
        let theory = theory_file_with("lemma secrecy: \"...\"\nlemma integrity: \"...\"\n");
        let path = theory.path().to_str().unwrap().replace('\\', "\\\\");
        let json = recipe_json(&path, "");
        let recipe = Recipe::from_str(&json).unwrap();
        let units = expand(&recipe, 4, 8).unwrap();
        assert_eq!(units.len(), 2);
        let lemmas: Vec<_> = units.iter().map(|u| u.lemma_name.as_str()).collect();
        assert!(lemmas.contains(&"secrecy"));
        assert!(lemmas.contains(&"integrity"));
        let secrecy_unit = units.iter().find(|u| u.lemma_name == "secrecy").unwrap();
        assert_eq!(secrecy_unit.unit_id, "auth--secrecy--stable");
        assert_eq!(secrecy_unit.max_cores, 4);
    }

    #[test]
    fn lemma_override_escalates_past_global_ceiling() {
        let theory = theory_file_with("lemma secrecy: \"...\"\n");
        let path = theory.path().to_str().unwrap().replace('\\', "\\\\");
        let json = format!(
            r#"{{
                "config": {{
                    "global_max_cores": 4,
                    "global_max_memory": 8,
                    "default_timeout": 3600,
                    "output_directory": "./out"
                }},
                "tamarin_versions": {{ "stable": {{ "path": "tamarin-prover" }} }},
                "tasks": {{
                    "auth": {{
                        "theory_file": "{path}",
                        "tamarin_versions": ["stable"],
                        "output_file_prefix": "auth",
                        "lemmas": [
                            {{ "name": "secrecy", "resources": {{ "max_cores": 8 }} }}
                        ]
                    }}
                }}
            }}"#
        );
        let recipe = Recipe::from_str(&json).unwrap();
        let units = expand(&recipe, 4, 8).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].max_cores, 8);
    }

    #[test]
    fn caps_task_override_to_global_ceiling() {
        let theory = theory_file_with("lemma secrecy: \"...\"\n");
        let path = theory.path().to_str().unwrap().replace('\\', "\\\\");
        let json = format!(
            r#"{{
                "config": {{
                    "global_max_cores": 2,
                    "global_max_memory": 4,
                    "default_timeout": 60,
                    "output_directory": "./out"
                }},
                "tamarin_versions": {{ "stable": {{ "path": "tamarin-prover" }} }},
                "tasks": {{
                    "auth": {{
                        "theory_file": "{path}",
                        "tamarin_versions": ["stable"],
                        "output_file_prefix": "auth",
                        "resources": {{ "max_cores": 16 }}
                    }}
                }}
            }}"#
        );
        let recipe = Recipe::from_str(&json).unwrap();
        let units = expand(&recipe, 2, 4).unwrap();
        assert_eq!(units[0].max_cores, 2);
    }

    #[test]
    fn dedupes_collisions_with_suffix() {
        let mut id_counts = HashMap::new();
        let a = dedupe_id(&mut id_counts, "auth--secrecy--stable".to_string());
        let b = dedupe_id(&mut id_counts, "auth--secrecy--stable".to_string());
        assert_eq!(a, "auth--secrecy--stable");
        assert_eq!(b, "auth--secrecy--stable_2");
    }
}
