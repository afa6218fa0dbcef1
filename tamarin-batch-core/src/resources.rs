//! Host resource discovery and the confirmation gate that runs before a
//! batch with resolved ceilings above a conservative threshold executes.

use crate::recipe::ResourceLimit;

/// Snapshot of host capacity used to resolve `"max"` / `"N%"` limits to
/// concrete counts.
#[derive(Debug, Clone, Copy)]
pub struct HostCapacity {
    pub total_cores: u32,
    pub total_memory_gb: u32,
}

impl HostCapacity {
    /// Probe the running host via `num_cpus` and `sysinfo`.
    pub fn probe() -> Self {
        let cores = num_cpus::get() as u32;
        let mut system =
            sysinfo::System::new_with_specifics(sysinfo::RefreshKind::new().with_memory(
                sysinfo::MemoryRefreshKind::new().with_ram(),
            ));
        system.refresh_memory();
        let total_memory_gb = (system.total_memory() / (1024 * 1024 * 1024)).max(1) as u32;
        HostCapacity {
            total_cores: cores.max(1),
            total_memory_gb,
        }
    }
}

/// Resolve a [`ResourceLimit`] against host capacity, rounding percentages
/// down but never below 1.
pub fn resolve_limit(limit: ResourceLimit, capacity: u32) -> u32 {
    match limit {
        ResourceLimit::Count(n) => n.min(capacity),
        ResourceLimit::Max => capacity,
        ResourceLimit::Percent(pct) => {
            let resolved = (capacity as u64 * pct as u64) / 100;
            resolved.max(1) as u32
        }
    }
}

/// Fraction of host capacity above which a batch is considered aggressive
/// enough to warrant interactive confirmation before it starts spawning
/// prover processes.
const CONFIRMATION_THRESHOLD: f64 = 0.9;

/// Whether the resolved ceilings are large enough relative to host
/// capacity to require confirmation before proceeding.
pub fn needs_confirmation(resolved_cores: u32, resolved_memory_gb: u32, capacity: HostCapacity) -> bool {
    let core_fraction = resolved_cores as f64 / capacity.total_cores as f64;
    let memory_fraction = resolved_memory_gb as f64 / capacity.total_memory_gb as f64;
    core_fraction >= CONFIRMATION_THRESHOLD || memory_fraction >= CONFIRMATION_THRESHOLD
}

/// Abstracts over how a near-host-capacity resource request is confirmed,
/// so the core engine never talks to a terminal directly.
pub trait ResourceConfirmation: Send + Sync {
    /// Returns `true` if the batch should proceed.
    fn confirm(&self, resolved_cores: u32, resolved_memory_gb: u32, capacity: HostCapacity) -> bool;
}

/// Confirms unconditionally; used for non-interactive invocations (CI,
/// `--yes`).
pub struct AutoAccept;

impl ResourceConfirmation for AutoAccept {
    fn confirm(&self, _resolved_cores: u32, _resolved_memory_gb: u32, _capacity: HostCapacity) -> bool {
        true
    }
}

/// Prompts on stdin/stdout, mirroring an interactive terminal session.
pub struct StdinPrompt;

impl ResourceConfirmation for StdinPrompt {
    fn confirm(&self, resolved_cores: u32, resolved_memory_gb: u32, capacity: HostCapacity) -> bool {
        use std::io::Write;
        println!(
            "Requested {resolved_cores} cores / {resolved_memory_gb} GB memory, host has {} cores / {} GB.",
            capacity.total_cores, capacity.total_memory_gb
        );
        print!("Proceed anyway? [y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
    }
}
