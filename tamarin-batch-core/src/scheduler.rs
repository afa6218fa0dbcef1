//! The cooperative, single-threaded scheduler: owns the [`Accountant`]
//! and the result cache, admits units as resources free up, and drives
//! each admitted unit's supervision as a spawned task reporting back
//! over an mpsc channel.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::accountant::Accountant;
use crate::cache::{Fingerprint, ResultCache};
use crate::parse::{ErrorKind, Verdict};
use crate::supervisor::{self, CancelLevel, SupervisedRun};
use crate::unit::Unit;

/// How pending units are ordered for admission when more than one could
/// fit the remaining budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Admit in recipe declaration order.
    Fifo,
    /// Admit the unit with the smallest `cores + memory_gb` footprint
    /// first.
    ShortestFirst,
    /// Admit the unit with the largest `cores + memory_gb` footprint
    /// first.
    LongestFirst,
}

/// Terminal state a unit ends the batch in, mirroring the closed set of
/// reasons a [`Verdict::Failed`] can carry plus the one success state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Completed,
    Failed,
    Timeout,
    MemoryLimitExceeded,
    SignalInterrupted,
}

impl UnitStatus {
    pub fn from_verdict(verdict: &Verdict) -> Self {
        match verdict {
            Verdict::Succeeded { .. } => UnitStatus::Completed,
            Verdict::Failed { error_kind, .. } => match error_kind {
                ErrorKind::Timeout => UnitStatus::Timeout,
                ErrorKind::MemoryLimit => UnitStatus::MemoryLimitExceeded,
                ErrorKind::SignalInterrupted => UnitStatus::SignalInterrupted,
                ErrorKind::ProverError | ErrorKind::WrapperKilled | ErrorKind::Unknown => {
                    UnitStatus::Failed
                }
            },
        }
    }
}

/// One unit's outcome as reported back to whatever drove the batch to
/// completion.
pub struct UnitResult {
    pub unit: Unit,
    pub command: Vec<String>,
    pub verdict: Verdict,
    pub status: UnitStatus,
    pub cache_hit: bool,
    pub exec_start: DateTime<Utc>,
    pub exec_end: DateTime<Utc>,
    pub exec_duration_monotonic_s: f64,
    pub avg_memory_mb: f64,
    pub peak_memory_mb: f64,
}

enum Event {
    Finished {
        unit_id: String,
        run: Result<SupervisedRun, supervisor::SupervisorError>,
    },
}

/// Handle for escalating cancellation across every unit the scheduler
/// currently has running: `request_soft` asks each to wind down with a
/// SIGTERM, `request_hard` kills them outright.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<CancelLevel>,
}

impl ShutdownHandle {
    pub fn request_soft(&self) {
        let _ = self.tx.send(CancelLevel::Soft);
    }

    pub fn request_hard(&self) {
        let _ = self.tx.send(CancelLevel::Hard);
    }
}

pub struct Scheduler {
    policy: SchedulingPolicy,
    accountant: Accountant,
    cache: ResultCache,
    prover_versions: HashMap<String, String>,
    cancel_tx: watch::Sender<CancelLevel>,
}

impl Scheduler {
    pub fn new(
        policy: SchedulingPolicy,
        total_cores: u32,
        total_memory_gb: u32,
        cache: ResultCache,
        prover_versions: HashMap<String, String>,
    ) -> Self {
        let (cancel_tx, _cancel_rx) = watch::channel(CancelLevel::None);
        Scheduler {
            policy,
            accountant: Accountant::new(total_cores, total_memory_gb),
            cache,
            prover_versions,
            cancel_tx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    fn order_pending(&self, mut pending: Vec<Unit>) -> Vec<Unit> {
        match self.policy {
            SchedulingPolicy::Fifo => pending,
            SchedulingPolicy::ShortestFirst => {
                pending.sort_by_key(resource_footprint);
                pending
            }
            SchedulingPolicy::LongestFirst => {
                pending.sort_by_key(|u| std::cmp::Reverse(resource_footprint(u)));
                pending
            }
        }
    }

    fn full_command(&self, unit: &Unit) -> Vec<String> {
        let version = self.prover_versions.get(&unit.alias).cloned();
        let mut command = vec![unit.executable_path.to_string_lossy().into_owned()];
        command.extend(supervisor::build_args(unit, version.as_deref()));
        command
    }

    /// Reads each unit's theory file once up front and computes its
    /// cache fingerprint. Units whose theory file can't be read get no
    /// fingerprint and are therefore never served from (or written to)
    /// the cache.
    fn compute_fingerprints(pending: &[Unit]) -> HashMap<String, Fingerprint> {
        let mut fingerprints = HashMap::with_capacity(pending.len());
        for unit in pending {
            if let Ok(contents) = std::fs::read(&unit.theory_file) {
                fingerprints.insert(unit.unit_id.clone(), Fingerprint::compute(unit, &contents));
            }
        }
        fingerprints
    }

    /// Runs every unit to completion, respecting the accountant's
    /// ceilings, and returns results in completion order (not admission
    /// order; callers that need a stable ordering should sort by
    /// `unit_id`).
    pub async fn run(&mut self, units: Vec<Unit>) -> Vec<UnitResult> {
        let pending = self.order_pending(units);
        let fingerprints = Self::compute_fingerprints(&pending);

        let mut results = Vec::with_capacity(pending.len());
        let mut still_pending = Vec::with_capacity(pending.len());
        for unit in pending {
            let cached = fingerprints.get(&unit.unit_id).and_then(|fp| self.cache.get(fp));
            match cached {
                Some(verdict) => {
                    info!(unit_id = %unit.unit_id, "serving cached verdict");
                    results.push(self.finalize_cache_hit(unit, verdict));
                }
                None => still_pending.push(unit),
            }
        }

        let mut pending = still_pending;
        let mut in_flight: HashMap<String, Unit> = HashMap::new();
        let (tx, mut rx) = mpsc::channel::<Event>(32);

        loop {
            self.admit_ready(&mut pending, &mut in_flight, &tx);

            if in_flight.is_empty() && pending.is_empty() {
                break;
            }

            match rx.recv().await {
                Some(Event::Finished { unit_id, run }) => {
                    let Some(unit) = in_flight.remove(&unit_id) else {
                        continue;
                    };
                    self.accountant.release(&unit);
                    let fingerprint = fingerprints.get(&unit.unit_id).cloned();
                    results.push(self.finalize(unit, fingerprint, run));
                }
                None => break,
            }
        }

        results
    }

    fn admit_ready(
        &mut self,
        pending: &mut Vec<Unit>,
        in_flight: &mut HashMap<String, Unit>,
        tx: &mpsc::Sender<Event>,
    ) {
        let mut i = 0;
        while i < pending.len() {
            if self.accountant.can_admit(&pending[i]) {
                let unit = pending.remove(i);
                self.accountant.reserve(&unit);
                info!(unit_id = %unit.unit_id, "admitting unit");

                let unit_for_task = unit.clone();
                let unit_id = unit.unit_id.clone();
                let prover_version = self.prover_versions.get(&unit.alias).cloned();
                let cancel_rx = self.cancel_tx.subscribe();
                let tx = tx.clone();

                in_flight.insert(unit.unit_id.clone(), unit);
                tokio::spawn(async move {
                    let run = supervisor::supervise(
                        &unit_for_task,
                        prover_version.as_deref(),
                        cancel_rx,
                    )
                    .await;
                    let _ = tx.send(Event::Finished { unit_id, run }).await;
                });
            } else {
                i += 1;
            }
        }
    }

    fn finalize_cache_hit(&self, unit: Unit, verdict: Verdict) -> UnitResult {
        let status = UnitStatus::from_verdict(&verdict);
        let command = self.full_command(&unit);
        let now = Utc::now();
        UnitResult {
            unit,
            command,
            verdict,
            status,
            cache_hit: true,
            exec_start: now,
            exec_end: now,
            exec_duration_monotonic_s: 0.0,
            avg_memory_mb: 0.0,
            peak_memory_mb: 0.0,
        }
    }

    fn finalize(
        &mut self,
        unit: Unit,
        fingerprint: Option<Fingerprint>,
        run: Result<SupervisedRun, supervisor::SupervisorError>,
    ) -> UnitResult {
        let command = self.full_command(&unit);
        match run {
            Ok(run) => {
                if let (Verdict::Succeeded { .. }, Some(fp)) = (&run.verdict, &fingerprint) {
                    let _ = self.cache.put(fp, &run.verdict);
                }
                let status = UnitStatus::from_verdict(&run.verdict);
                UnitResult {
                    unit,
                    command,
                    verdict: run.verdict,
                    status,
                    cache_hit: false,
                    exec_start: run.started_at,
                    exec_end: run.ended_at,
                    exec_duration_monotonic_s: run.wall_time_s,
                    avg_memory_mb: bytes_to_mb(run.avg_memory_bytes),
                    peak_memory_mb: bytes_to_mb(run.peak_memory_bytes),
                }
            }
            Err(err) => {
                warn!(unit_id = %unit.unit_id, error = %err, "failed to spawn unit");
                let verdict = Verdict::Failed {
                    lemma: unit.lemma_name.clone(),
                    return_code: None,
                    error_kind: ErrorKind::Unknown,
                    description: err.to_string(),
                    tail_stderr: Vec::new(),
                };
                let status = UnitStatus::from_verdict(&verdict);
                let now = Utc::now();
                UnitResult {
                    unit,
                    command,
                    verdict,
                    status,
                    cache_hit: false,
                    exec_start: now,
                    exec_end: now,
                    exec_duration_monotonic_s: 0.0,
                    avg_memory_mb: 0.0,
                    peak_memory_mb: 0.0,
                }
            }
        }
    }
}

fn resource_footprint(unit: &Unit) -> u32 {
    unit.max_cores + unit.max_memory_gb
}

fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
