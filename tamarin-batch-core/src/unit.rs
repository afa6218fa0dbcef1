//! The execution unit: the fully resolved, self-contained description of
//! a single prover invocation. Everything downstream (the scheduler, the
//! supervisor, the cache, the report) operates purely in terms of units
//! and never looks back at the recipe they were expanded from.

use std::path::PathBuf;

/// One fully resolved prover invocation. Immutable once constructed by
/// [`crate::expand::expand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Unique within a batch: `<output_file_prefix>--<lemma>--<alias>`,
    /// with a `_2`, `_3`, ... suffix appended on collision.
    pub unit_id: String,
    pub task_name: String,
    pub alias: String,
    pub executable_path: PathBuf,
    pub theory_file: PathBuf,
    pub lemma_name: String,
    pub tamarin_options: Vec<String>,
    pub preprocess_flags: Vec<String>,
    pub output_file_prefix: String,
    pub max_cores: u32,
    pub max_memory_gb: u32,
    pub timeout_s: u32,
    /// Where the prover's own `--output=` artifact for this unit lands.
    pub output_file: PathBuf,
    /// Directory holding this unit's `--output-json=`/`--output-dot=`
    /// trace artifacts, named `<unit_id>.json` / `<unit_id>.dot`.
    pub traces_dir: PathBuf,
}
