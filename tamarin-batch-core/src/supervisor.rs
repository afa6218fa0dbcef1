//! Process supervision: spawns a unit's prover invocation, samples its
//! (and its descendants') memory at 1Hz, and enforces wall-clock and
//! memory ceilings with a graceful-then-hard-kill escalation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::compat;
use crate::parse::{self, RunReason, Verdict};
use crate::unit::Unit;

/// Cap on how much of a stream's tail is retained in memory; older bytes
/// are discarded as new ones arrive, so a unit that runs for a full
/// timeout never grows its buffer past this bound regardless of how
/// chatty the prover is.
const TAIL_BUFFER_BYTES: usize = 1024 * 1024;

/// How often descendant memory is resampled while a unit is running.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn prover for unit '{unit_id}': {source}")]
    Spawn {
        unit_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of supervising one unit to completion, carrying enough to
/// feed both the cache and the report assembler.
pub struct SupervisedRun {
    pub verdict: Verdict,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub wall_time_s: f64,
    pub peak_memory_bytes: u64,
    pub avg_memory_bytes: u64,
}

/// A bounded ring of the most recent bytes written to it, exposed as a
/// lossy UTF-8 string for reporting.
struct TailBuffer {
    data: std::collections::VecDeque<u8>,
    cap: usize,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        TailBuffer {
            data: std::collections::VecDeque::with_capacity(cap.min(64 * 1024)),
            cap,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.data.len() == self.cap {
                self.data.pop_front();
            }
            self.data.push_back(b);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.data.into_iter().collect::<Vec<u8>>()).into_owned()
    }
}

async fn drain_to_tail<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> String {
    let mut buf = [0u8; 8192];
    let mut tail = TailBuffer::new(cap);
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => tail.push(&buf[..n]),
            Err(_) => break,
        }
    }
    tail.into_string()
}

/// Sum of RSS, in bytes, for `root_pid` and every process transitively
/// parented by it. `sysinfo` has no direct children-of-pid query, so
/// this walks the full process table once and follows parent links.
fn descendant_rss_bytes(system: &sysinfo::System, root_pid: sysinfo::Pid) -> u64 {
    let mut children_of: HashMap<sysinfo::Pid, Vec<sysinfo::Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children_of.entry(parent).or_default().push(*pid);
        }
    }

    let mut total = 0u64;
    let mut stack = vec![root_pid];
    let mut visited = std::collections::HashSet::new();
    while let Some(pid) = stack.pop() {
        if !visited.insert(pid) {
            continue;
        }
        if let Some(process) = system.process(pid) {
            total += process.memory();
        }
        if let Some(children) = children_of.get(&pid) {
            stack.extend(children.iter().copied());
        }
    }
    total
}

/// Send SIGTERM to `pid` on Unix; a no-op that relies on the hard kill
/// path everywhere else.
#[cfg(unix)]
fn send_sigterm(pid: u32) {
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGTERM,
    );
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) {}

/// Grace period between SIGTERM and SIGKILL during soft cancellation or
/// ceiling enforcement.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Removes `<traces_dir>/<unit_id>.{json,dot}` if the prover left them
/// behind empty (e.g. a run cancelled before it ever wrote a trace).
fn remove_empty_trace_files(unit: &Unit) {
    for ext in ["json", "dot"] {
        let path = unit.traces_dir.join(format!("{}.{ext}", unit.unit_id));
        if let Ok(meta) = std::fs::metadata(&path) {
            if meta.len() == 0 {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

/// Runs a single unit to completion (or until a ceiling or cancellation
/// forces it down), returning its parsed verdict regardless of how it
/// ended.
pub async fn supervise(
    unit: &Unit,
    prover_version: Option<&str>,
    cancel: tokio::sync::watch::Receiver<CancelLevel>,
) -> Result<SupervisedRun, SupervisorError> {
    let args = build_args(unit, prover_version);

    let mut command = Command::new(&unit.executable_path);
    command
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started_at = Utc::now();
    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| SupervisorError::Spawn {
        unit_id: unit.unit_id.clone(),
        source: e,
    })?;

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let stdout_task = tokio::spawn(drain_to_tail(stdout, TAIL_BUFFER_BYTES));
    let stderr_task = tokio::spawn(drain_to_tail(stderr, TAIL_BUFFER_BYTES));

    let pid = child.id();
    let outcome = run_with_ceilings(&mut child, unit, pid, cancel, start).await;

    let stdout_text = stdout_task.await.unwrap_or_default();
    let stderr_text = stderr_task.await.unwrap_or_default();
    let wall_time_s = start.elapsed().as_secs_f64();
    let ended_at = Utc::now();

    remove_empty_trace_files(unit);

    let verdict = parse::classify(
        &unit.lemma_name,
        outcome.exit_code,
        outcome.reason,
        &stdout_text,
        &stderr_text,
    );

    Ok(SupervisedRun {
        verdict,
        exit_code: outcome.exit_code,
        started_at,
        ended_at,
        wall_time_s,
        peak_memory_bytes: outcome.peak_memory_bytes,
        avg_memory_bytes: outcome.avg_memory_bytes,
    })
}

/// Two-level cancellation signal broadcast from the scheduler: `Soft`
/// asks a unit to wind down gracefully, `Hard` demands immediate death.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelLevel {
    None,
    Soft,
    Hard,
}

struct CeilingOutcome {
    exit_code: Option<i32>,
    reason: Option<RunReason>,
    peak_memory_bytes: u64,
    avg_memory_bytes: u64,
}

async fn run_with_ceilings(
    child: &mut tokio::process::Child,
    unit: &Unit,
    pid: Option<u32>,
    mut cancel: tokio::sync::watch::Receiver<CancelLevel>,
    start: Instant,
) -> CeilingOutcome {
    let timeout = Duration::from_secs(unit.timeout_s as u64);
    let memory_ceiling_bytes = unit.max_memory_gb as u64 * 1024 * 1024 * 1024;
    let mut peak_memory = 0u64;
    let mut memory_sum = 0u64;
    let mut memory_samples = 0u64;
    let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
    let mut system = sysinfo::System::new();

    loop {
        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                let avg = memory_sum.checked_div(memory_samples.max(1)).unwrap_or(0);
                return CeilingOutcome { exit_code: code, reason: None, peak_memory_bytes: peak_memory, avg_memory_bytes: avg };
            }
            _ = ticker.tick() => {
                if let Some(pid) = pid {
                    system.refresh_all();
                    let rss = descendant_rss_bytes(&system, sysinfo::Pid::from_u32(pid));
                    peak_memory = peak_memory.max(rss);
                    memory_sum += rss;
                    memory_samples += 1;
                    if rss > memory_ceiling_bytes {
                        warn!(unit_id = %unit.unit_id, rss, memory_ceiling_bytes, "memory ceiling exceeded");
                        terminate_gracefully(child, pid).await;
                        let avg = memory_sum / memory_samples.max(1);
                        return CeilingOutcome { exit_code: None, reason: Some(RunReason::MemoryLimit), peak_memory_bytes: peak_memory, avg_memory_bytes: avg };
                    }
                }
                if start.elapsed() >= timeout {
                    debug!(unit_id = %unit.unit_id, "timeout reached");
                    if let Some(pid) = pid {
                        terminate_gracefully(child, pid).await;
                    }
                    let avg = memory_sum.checked_div(memory_samples.max(1)).unwrap_or(0);
                    return CeilingOutcome { exit_code: None, reason: Some(RunReason::Timeout), peak_memory_bytes: peak_memory, avg_memory_bytes: avg };
                }
            }
            _ = cancel.changed() => {
                match *cancel.borrow() {
                    CancelLevel::None => {}
                    CancelLevel::Soft => {
                        // Soft cancellation only stops new admission; a
                        // unit already running is left to finish.
                        if let Some(pid) = pid {
                            send_sigterm(pid);
                        }
                    }
                    CancelLevel::Hard => {
                        let _ = child.start_kill();
                        let avg = memory_sum.checked_div(memory_samples.max(1)).unwrap_or(0);
                        return CeilingOutcome { exit_code: None, reason: Some(RunReason::Cancelled { hard: true }), peak_memory_bytes: peak_memory, avg_memory_bytes: avg };
                    }
                }
            }
        }
    }
}

async fn terminate_gracefully(child: &mut tokio::process::Child, pid: u32) {
    send_sigterm(pid);
    let grace = tokio::time::sleep(GRACE_PERIOD);
    tokio::select! {
        _ = child.wait() => {}
        _ = grace => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

/// Builds the argument vector a prover invocation is run with:
/// `+RTS -N<cores> -RTS`, the theory file, `--prove=<lemma>`, any
/// user-supplied options, `-D=<flag>` per active preprocessor flag, and
/// the `--output-*`/`--output=` artifact destinations (elided on
/// versions that predate them).
pub fn build_args(unit: &Unit, prover_version: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "+RTS".to_string(),
        format!("-N{}", unit.max_cores),
        "-RTS".to_string(),
    ];
    args.push(unit.theory_file.to_string_lossy().into_owned());
    args.push(format!("--prove={}", unit.lemma_name));
    args.extend(unit.tamarin_options.iter().cloned());
    for flag in &unit.preprocess_flags {
        args.push(format!("-D={flag}"));
    }

    let json_trace = unit.traces_dir.join(format!("{}.json", unit.unit_id));
    let dot_trace = unit.traces_dir.join(format!("{}.dot", unit.unit_id));
    args.push(format!("--output-json={}", json_trace.display()));
    args.push(format!("--output-dot={}", dot_trace.display()));
    args.push(format!("--output={}", unit.output_file.display()));

    match prover_version {
        Some(version) => compat::filter_args(args, version),
        None => args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_unit() -> Unit {
        Unit {
            unit_id: "auth--secrecy--stable".to_string(),
            task_name: "auth".to_string(),
            alias: "stable".to_string(),
            executable_path: PathBuf::from("/bin/echo"),
            theory_file: PathBuf::from("auth.spthy"),
            lemma_name: "secrecy".to_string(),
            tamarin_options: vec!["--derivcheck-timeout=0".to_string()],
            preprocess_flags: vec!["FAST".to_string()],
            output_file_prefix: "auth".to_string(),
            max_cores: 2,
            max_memory_gb: 1,
            timeout_s: 60,
            output_file: PathBuf::from("/tmp/out/proofs/auth--secrecy--stable.spthy"),
            traces_dir: PathBuf::from("/tmp/out/traces"),
        }
    }

    #[test]
    fn builds_expected_arg_shape() {
        let unit = sample_unit();
        let args = build_args(&unit, None);
        assert!(args.contains(&"+RTS".to_string()));
        assert!(args.contains(&"-N2".to_string()));
        assert!(args.contains(&"-RTS".to_string()));
        assert!(args.contains(&"--prove=secrecy".to_string()));
        assert!(args.contains(&"-D=FAST".to_string()));
        assert!(args.contains(&"auth.spthy".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--output-json=")));
        assert!(args.iter().any(|a| a.starts_with("--output-dot=")));
        assert!(args.iter().any(|a| a.starts_with("--output=")));
    }

    #[test]
    fn elides_output_flags_for_old_prover() {
        let unit = sample_unit();
        let args = build_args(&unit, Some("1.6.1"));
        assert!(!args.iter().any(|a| a.starts_with("--output")));
    }

    #[test]
    fn tail_buffer_keeps_only_last_bytes() {
        let mut tail = TailBuffer::new(4);
        tail.push(b"abcdef");
        assert_eq!(tail.into_string(), "cdef");
    }

    #[tokio::test]
    async fn supervises_a_trivial_process_to_completion() {
        let unit = Unit {
            executable_path: PathBuf::from("/bin/echo"),
            ..sample_unit()
        };
        let (_tx, rx) = tokio::sync::watch::channel(CancelLevel::None);
        let result = supervise(&unit, None, rx).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
    }
}
