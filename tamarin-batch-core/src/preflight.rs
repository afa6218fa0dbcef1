//! Dry-run checks performed before a batch commits to running proofs:
//! alias version/integrity probing and a parse-only invocation per
//! unique (alias, theory file) pair, surfacing wellformedness warnings
//! early without spending a full proof attempt on them.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::recipe::{AliasEntry, Recipe};
use crate::unit::Unit;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const INTEGRITY_PROBE_TIMEOUT: Duration = Duration::from_secs(60);
const WELLFORMEDNESS_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of probing one alias's executable, independent of any
/// recipe task.
#[derive(Debug, Clone)]
pub struct AliasProbe {
    pub alias: String,
    pub path: PathBuf,
    pub exists: bool,
    pub reported_version: Option<String>,
    pub integrity_ok: Option<bool>,
}

/// Runs `--version` and then the prover's self-test (`test`), never
/// failing the batch on a probe result; failures are recorded, not
/// propagated, so a single broken alias does not block a run that
/// never uses it.
pub async fn probe_alias(alias: &str, entry: &AliasEntry) -> AliasProbe {
    let exists = entry.executable_path.exists();
    if !exists {
        return AliasProbe {
            alias: alias.to_string(),
            path: entry.executable_path.clone(),
            exists: false,
            reported_version: None,
            integrity_ok: Some(false),
        };
    }

    let reported_version = run_capturing_stdout(&entry.executable_path, &["--version"], VERSION_PROBE_TIMEOUT)
        .await
        .and_then(|stdout| extract_version(&stdout));

    let integrity_ok = run_capturing_stdout(&entry.executable_path, &["test"], INTEGRITY_PROBE_TIMEOUT)
        .await
        .map(|stdout| {
            stdout.contains("All tests successful")
                && stdout.contains("should work as intended")
        });

    AliasProbe {
        alias: alias.to_string(),
        path: entry.executable_path.clone(),
        exists: true,
        reported_version,
        integrity_ok,
    }
}

fn extract_version(stdout: &str) -> Option<String> {
    let first_line = stdout.lines().next()?;
    let idx = first_line.find("tamarin-prover")?;
    first_line[idx..]
        .split_whitespace()
        .nth(1)
        .map(|s| s.to_string())
}

async fn run_capturing_stdout(path: &std::path::Path, args: &[&str], timeout: Duration) -> Option<String> {
    let mut command = Command::new(path);
    command.args(args).stdout(Stdio::piped()).stderr(Stdio::null());
    let child = command.spawn().ok()?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .ok()?
        .ok()?;
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A wellformedness finding surfaced by a parse-only pass over one
/// theory file with one alias, before any proof attempt is made.
#[derive(Debug, Clone)]
pub struct WellformednessIssue {
    pub alias: String,
    pub theory_file: PathBuf,
    pub warnings: Vec<String>,
}

/// Runs every unique (alias, theory file) combination among `units`
/// through the prover with no `--prove` flag, collecting any
/// `WARNING: ... wellformedness check failed` lines.
pub async fn check_wellformedness(recipe: &Recipe, units: &[Unit]) -> Vec<WellformednessIssue> {
    let mut seen = HashSet::new();
    let mut issues = Vec::new();

    for unit in units {
        let key = (unit.alias.clone(), unit.theory_file.clone());
        if !seen.insert(key) {
            continue;
        }
        let Some(entry) = recipe.aliases.get(&unit.alias) else {
            continue;
        };
        let Some(stdout) = run_capturing_stdout(
            &entry.executable_path,
            &[unit.theory_file.to_str().unwrap_or_default()],
            WELLFORMEDNESS_PROBE_TIMEOUT,
        )
        .await
        else {
            continue;
        };

        let warnings: Vec<String> = stdout
            .lines()
            .filter(|line| line.contains("WARNING:") && line.contains("wellformedness check failed"))
            .map(|line| line.trim().to_string())
            .collect();

        if !warnings.is_empty() {
            issues.push(WellformednessIssue {
                alias: unit.alias.clone(),
                theory_file: unit.theory_file.clone(),
                warnings,
            });
        }
    }

    issues
}
