//! Parses a completed prover invocation's stdout/stderr/exit status into
//! a structured [`Verdict`]. Never panics: malformed or truncated output
//! degrades to a [`Verdict::Failed`] with [`ErrorKind::Unknown`] rather
//! than aborting the batch.

use serde::{Deserialize, Serialize};

/// The prover's conclusion about a lemma it actually finished analyzing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LemmaOutcome {
    Verified,
    Falsified,
    Unterminated,
}

/// Why a unit did not reach a terminal prover-reported outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    MemoryLimit,
    /// The prover exited non-zero on its own.
    ProverError,
    /// The supervisor killed the process directly (hard kill path) and
    /// no signal delivery is implied.
    WrapperKilled,
    /// The running process was terminated by a caught signal (the hard
    /// cancellation path, which always goes through SIGTERM/SIGKILL).
    SignalInterrupted,
    Unknown,
}

/// The outcome of supervising a single requested lemma, as a closed sum
/// type: a unit either reaches a prover-reported conclusion or it fails
/// for one of a fixed set of reasons, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Succeeded {
        lemma: String,
        lemma_outcome: LemmaOutcome,
        steps: Option<u64>,
        /// The `(...)` analysis kind tamarin prints next to the lemma
        /// name, e.g. `all-traces` or `exists-trace`.
        analysis_kind: Option<String>,
        /// The `processing time: <n>s` value the prover itself reports,
        /// distinct from the supervisor's own wall-clock measurement.
        prover_reported_time_s: Option<f64>,
        warnings: Vec<String>,
    },
    Failed {
        lemma: String,
        return_code: Option<i32>,
        error_kind: ErrorKind,
        description: String,
        /// Last ten (or fewer) non-empty lines of stderr.
        tail_stderr: Vec<String>,
    },
}

impl Verdict {
    #[cfg(test)]
    pub fn verified(lemma: &str) -> Self {
        Verdict::Succeeded {
            lemma: lemma.to_string(),
            lemma_outcome: LemmaOutcome::Verified,
            steps: None,
            analysis_kind: None,
            prover_reported_time_s: None,
            warnings: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn falsified(lemma: &str, description: &str) -> Self {
        let _ = description;
        Verdict::Succeeded {
            lemma: lemma.to_string(),
            lemma_outcome: LemmaOutcome::Falsified,
            steps: None,
            analysis_kind: None,
            prover_reported_time_s: None,
            warnings: Vec::new(),
        }
    }

    pub fn lemma(&self) -> &str {
        match self {
            Verdict::Succeeded { lemma, .. } => lemma,
            Verdict::Failed { lemma, .. } => lemma,
        }
    }
}

/// Why the supervisor cut a unit short before the prover produced a
/// verdict of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReason {
    Timeout,
    MemoryLimit,
    /// Cancelled mid-run; `hard` distinguishes the shutdown level that
    /// caused it (soft cancellation never interrupts a running unit, so
    /// this is only ever observed on the hard path).
    Cancelled { hard: bool },
}

/// Tamarin's summary block looks like:
/// ```text
/// summary of summaries:
///
/// analyzed: auth.spthy
///
///   secrecy (all-traces): verified (12 steps)
///   authentication (exists-trace): falsified - found trace (4 steps)
///
/// processing time: 0.42s
/// ```
/// This scans line by line for `<lemma> (<kind>): <outcome>[ - ...][ (<n> steps)]`,
/// a trailing `processing time: <seconds>s`, `WARNING: <text>` lines,
/// and a synthesized `N wellformedness check(s) failed` warning.
fn parse_success(stdout: &str, lemma: &str) -> Verdict {
    let mut warnings = Vec::new();
    for line in stdout.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("WARNING:") {
            warnings.push(rest.trim().to_string());
        }
    }
    if let Some(count) = wellformedness_failure_count(stdout) {
        warnings.push(format!(
            "{count} wellformedness check{} failed",
            if count == 1 { "" } else { "s" }
        ));
    }

    let prover_reported_time_s = stdout.lines().find_map(parse_processing_time);

    let parsed = stdout.lines().find_map(|line| parse_lemma_line(line, lemma));
    match parsed {
        Some((lemma_outcome, steps, analysis_kind)) => Verdict::Succeeded {
            lemma: lemma.to_string(),
            lemma_outcome,
            steps,
            analysis_kind,
            prover_reported_time_s,
            warnings,
        },
        None => Verdict::Failed {
            lemma: lemma.to_string(),
            return_code: Some(0),
            error_kind: ErrorKind::Unknown,
            description: "prover exited successfully but reported no recognizable verdict for this lemma".to_string(),
            tail_stderr: Vec::new(),
        },
    }
}

/// Parses a `<name> (<kind>): <outcome>[ - ...][ (<n> steps)]` line for
/// `lemma`, returning its outcome, step count and analysis kind.
fn parse_lemma_line(line: &str, lemma: &str) -> Option<(LemmaOutcome, Option<u64>, Option<String>)> {
    let trimmed = line.trim();
    let paren_open = trimmed.find('(')?;
    let paren_close = trimmed.find(')')?;
    if paren_open >= paren_close {
        return None;
    }
    let name = trimmed[..paren_open].trim();
    if name != lemma {
        return None;
    }
    let analysis_kind = trimmed[paren_open + 1..paren_close].trim();
    let analysis_kind = if analysis_kind.is_empty() {
        None
    } else {
        Some(analysis_kind.to_string())
    };

    let rest = trimmed[paren_close + 1..].trim();
    let rest = rest.strip_prefix(':')?.trim();

    let outcome = if rest.starts_with("verified") {
        LemmaOutcome::Verified
    } else if rest.starts_with("falsified") {
        LemmaOutcome::Falsified
    } else if rest.starts_with("analysis incomplete") || rest.starts_with("unterminated") {
        LemmaOutcome::Unterminated
    } else {
        return None;
    };

    let steps = rest
        .rfind('(')
        .and_then(|i| rest[i + 1..].split_whitespace().next())
        .and_then(|tok| tok.parse::<u64>().ok());

    Some((outcome, steps, analysis_kind))
}

/// Parses a `processing time: <seconds>s` line into seconds.
fn parse_processing_time(line: &str) -> Option<f64> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix("processing time:")?.trim();
    rest.strip_suffix('s')?.trim().parse::<f64>().ok()
}

/// Parses a `N wellformedness check(s) failed` line into `N`.
fn wellformedness_failure_count(stdout: &str) -> Option<u64> {
    stdout.lines().find_map(|line| {
        let trimmed = line.trim();
        let rest = trimmed.strip_suffix("failed")?.trim();
        let rest = rest
            .strip_suffix("wellformedness checks")
            .or_else(|| rest.strip_suffix("wellformedness check"))?
            .trim();
        rest.parse::<u64>().ok()
    })
}

/// Classifies a completed prover invocation into a terminal [`Verdict`]
/// for `lemma`, given the supervisor's exit status and, if it cut the
/// run short, the reason why.
pub fn classify(
    lemma: &str,
    exit_code: Option<i32>,
    reason: Option<RunReason>,
    stdout: &str,
    stderr: &str,
) -> Verdict {
    match reason {
        Some(RunReason::Timeout) => Verdict::Failed {
            lemma: lemma.to_string(),
            return_code: exit_code,
            error_kind: ErrorKind::Timeout,
            description: "task timed out during execution".to_string(),
            tail_stderr: tail_lines(stderr, 10),
        },
        Some(RunReason::MemoryLimit) => Verdict::Failed {
            lemma: lemma.to_string(),
            return_code: exit_code,
            error_kind: ErrorKind::MemoryLimit,
            description: "task exceeded its memory ceiling during execution".to_string(),
            tail_stderr: tail_lines(stderr, 10),
        },
        Some(RunReason::Cancelled { hard }) => Verdict::Failed {
            lemma: lemma.to_string(),
            return_code: exit_code,
            error_kind: if hard {
                ErrorKind::SignalInterrupted
            } else {
                ErrorKind::WrapperKilled
            },
            description: "task was cancelled before completion".to_string(),
            tail_stderr: tail_lines(stderr, 10),
        },
        None => match exit_code {
            Some(0) => parse_success(stdout, lemma),
            Some(code) => Verdict::Failed {
                lemma: lemma.to_string(),
                return_code: Some(code),
                error_kind: ErrorKind::ProverError,
                description: format!("task failed with return code {code}"),
                tail_stderr: tail_lines(stderr, 10),
            },
            None => Verdict::Failed {
                lemma: lemma.to_string(),
                return_code: None,
                error_kind: ErrorKind::Unknown,
                description: "task ended without a process exit code".to_string(),
                tail_stderr: tail_lines(stderr, 10),
            },
        },
    }
}

/// Last `n` non-empty lines of `text`.
fn tail_lines(text: &str, n: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verified_lemma() {
        let stdout = "summary of summaries:\n\nanalyzed: auth.spthy\n\n  secrecy (all-traces): verified (12 steps)\n\nprocessing time: 0.42s\n";
        let verdict = classify("secrecy", Some(0), None, stdout, "");
        match verdict {
            Verdict::Succeeded {
                lemma_outcome,
                steps,
                analysis_kind,
                prover_reported_time_s,
                ..
            } => {
                assert_eq!(lemma_outcome, LemmaOutcome::Verified);
                assert_eq!(steps, Some(12));
                assert_eq!(analysis_kind.as_deref(), Some("all-traces"));
                assert_eq!(prover_reported_time_s, Some(0.42));
            }
            other => panic!("expected Succeeded, got {other:?}"),
        }
    }

    #[test]
    fn parses_falsified_lemma() {
        let stdout = "  authentication (exists-trace): falsified - found trace (4 steps)\n";
        let verdict = classify("authentication", Some(0), None, stdout, "");
        match verdict {
            Verdict::Succeeded { lemma_outcome, steps, .. } => {
                assert_eq!(lemma_outcome, LemmaOutcome::Falsified);
                assert_eq!(steps, Some(4));
            }
            other => panic!("expected Succeeded, got {other:?}"),
        }
    }

    #[test]
    fn collects_warnings_and_wellformedness_count() {
        let stdout = "WARNING: lemma uses induction\n2 wellformedness checks failed\n  secrecy (all-traces): verified (1 steps)\n";
        let verdict = classify("secrecy", Some(0), None, stdout, "");
        match verdict {
            Verdict::Succeeded { warnings, .. } => {
                assert!(warnings.contains(&"lemma uses induction".to_string()));
                assert!(warnings.iter().any(|w| w.contains("2 wellformedness checks failed")));
            }
            other => panic!("expected Succeeded, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_unknown_on_unparsable_output() {
        let verdict = classify("secrecy", Some(0), None, "garbage output", "oom-killed");
        match verdict {
            Verdict::Failed { error_kind, .. } => assert_eq!(error_kind, ErrorKind::Unknown),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn non_zero_exit_is_prover_error() {
        let verdict = classify("secrecy", Some(1), None, "", "boom");
        match verdict {
            Verdict::Failed {
                error_kind,
                return_code,
                tail_stderr,
                ..
            } => {
                assert_eq!(error_kind, ErrorKind::ProverError);
                assert_eq!(return_code, Some(1));
                assert_eq!(tail_stderr, vec!["boom".to_string()]);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn hard_cancellation_is_signal_interrupted() {
        let verdict = classify("secrecy", None, Some(RunReason::Cancelled { hard: true }), "", "");
        match verdict {
            Verdict::Failed { error_kind, .. } => assert_eq!(error_kind, ErrorKind::SignalInterrupted),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn tail_lines_keeps_only_last_non_empty_lines() {
        let text = "a\n\nb\nc\nd\ne\nf\ng\nh\ni\nj\nk\n";
        let tail = tail_lines(text, 10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail.last(), Some(&"k".to_string()));
    }
}
