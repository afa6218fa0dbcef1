//! Content-addressed result cache: fingerprints a unit from the inputs
//! that determine its outcome and reuses a prior verdict when nothing
//! material has changed since.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::parse::Verdict;
use crate::unit::Unit;

/// Separator joined between fingerprint components before the final
/// hash, chosen to never appear inside any component on its own.
const SEPARATOR: &str = "\u{1f}";

/// Default cache size bound before mtime-based eviction kicks in.
const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// A unit's cache key: the SHA-256 of its six ordered identity
/// components joined by [`SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for `unit`, using `theory_contents` as the
    /// hashed representation of its theory file (the caller reads it
    /// once and can reuse the bytes for lemma discovery too).
    ///
    /// Six ordered components, each sensitive to a distinct axis a
    /// verdict can become stale on: theory file bytes, the executable's
    /// own identity (path, mtime, size), the requested lemma, the sorted
    /// option/flag sets, and the resolved cores/memory/timeout triple.
    pub fn compute(unit: &Unit, theory_contents: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        let theory_hash = {
            let mut h = Sha256::new();
            h.update(theory_contents);
            hex::encode(h.finalize())
        };

        let mut sorted_options = unit.tamarin_options.clone();
        sorted_options.sort();
        let mut sorted_flags = unit.preprocess_flags.clone();
        sorted_flags.sort();

        let parts = [
            theory_hash,
            executable_identity(&unit.executable_path),
            unit.lemma_name.clone(),
            sorted_options.join(","),
            sorted_flags.join(","),
            format!("{}|{}|{}", unit.max_cores, unit.max_memory_gb, unit.timeout_s),
        ];
        hasher.update(parts.join(SEPARATOR).as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    fn hex(&self) -> &str {
        &self.0
    }
}

/// `SHA-256("<executable_path>|<mtime>|<size>")`, so a prover binary
/// that's been rebuilt or replaced invalidates every fingerprint that
/// used to point at it. A missing or unreadable executable degrades to
/// `mtime=0, size=0` rather than failing the whole computation.
fn executable_identity(path: &std::path::Path) -> String {
    let (mtime, size) = fs::metadata(path)
        .map(|meta| {
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            (mtime, meta.len())
        })
        .unwrap_or((0, 0));
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{mtime}|{size}", path.display()).as_bytes());
    hex::encode(hasher.finalize())
}

/// A cached verdict together with the bookkeeping needed for size-bound
/// eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    fingerprint: String,
    verdict: Verdict,
    stored_at_unix: u64,
}

/// Sharded-directory content-addressed store for unit verdicts.
/// Misses (including any I/O error while reading a hit) are treated as
/// cache misses rather than propagated as hard failures, since a
/// corrupted cache entry should never block a run.
pub struct ResultCache {
    root: PathBuf,
    max_bytes: u64,
    index: HashMap<String, PathBuf>,
}

impl ResultCache {
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::open_with_bound(root, DEFAULT_MAX_BYTES)
    }

    pub fn open_with_bound(root: impl Into<PathBuf>, max_bytes: u64) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut cache = ResultCache {
            root,
            max_bytes,
            index: HashMap::new(),
        };
        cache.rebuild_index();
        Ok(cache)
    }

    fn shard_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let hex = fingerprint.hex();
        self.root.join(&hex[0..2]).join(format!("{hex}.json"))
    }

    fn rebuild_index(&mut self) {
        for entry in walkdir::WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.index.insert(stem.to_string(), path.to_path_buf());
            }
        }
    }

    /// Look up a previously stored verdict. Any read or deserialize
    /// failure is treated as a miss, not an error.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Verdict> {
        let path = self.index.get(fingerprint.hex())?;
        let contents = fs::read_to_string(path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&contents).ok()?;
        Some(entry.verdict)
    }

    /// Store a verdict, replacing any prior entry under the same
    /// fingerprint, then enforce the size bound.
    pub fn put(&mut self, fingerprint: &Fingerprint, verdict: &Verdict) -> std::io::Result<()> {
        let path = self.shard_path(fingerprint);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry = CacheEntry {
            fingerprint: fingerprint.hex().to_string(),
            verdict: verdict.clone(),
            stored_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let json = serde_json::to_string_pretty(&entry)?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &path)?;
        self.index.insert(fingerprint.hex().to_string(), path);
        self.evict_if_over_bound()
    }

    fn total_size(&self) -> u64 {
        self.index
            .values()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Remove the least-recently-modified entries until total size is
    /// back under the configured bound.
    fn evict_if_over_bound(&mut self) -> std::io::Result<()> {
        if self.total_size() <= self.max_bytes {
            return Ok(());
        }
        let mut by_mtime: Vec<(PathBuf, SystemTime)> = self
            .index
            .values()
            .filter_map(|p| {
                fs::metadata(p)
                    .and_then(|m| m.modified())
                    .ok()
                    .map(|mtime| (p.clone(), mtime))
            })
            .collect();
        by_mtime.sort_by_key(|(_, mtime)| *mtime);

        let mut size = self.total_size();
        for (path, _) in by_mtime {
            if size <= self.max_bytes {
                break;
            }
            if let Ok(meta) = fs::metadata(&path) {
                size = size.saturating_sub(meta.len());
            }
            let _ = fs::remove_file(&path);
            self.index.retain(|_, p| p != &path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Verdict;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sample_unit() -> Unit {
        Unit {
            unit_id: "auth--secrecy--stable".to_string(),
            task_name: "auth".to_string(),
            alias: "stable".to_string(),
            executable_path: PathBuf::from("tamarin-prover"),
            theory_file: PathBuf::from("auth.spthy"),
            lemma_name: "secrecy".to_string(),
            tamarin_options: vec![],
            preprocess_flags: vec![],
            output_file_prefix: "auth".to_string(),
            max_cores: 1,
            max_memory_gb: 1,
            timeout_s: 60,
            output_file: PathBuf::from("out/proofs/auth--secrecy--stable.spthy"),
            traces_dir: PathBuf::from("out/traces"),
        }
    }

    #[test]
    fn fingerprint_is_stable_for_identical_inputs() {
        let unit = sample_unit();
        let a = Fingerprint::compute(&unit, b"theory source");
        let b = Fingerprint::compute(&unit, b"theory source");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_theory_contents() {
        let unit = sample_unit();
        let a = Fingerprint::compute(&unit, b"theory source v1");
        let b = Fingerprint::compute(&unit, b"theory source v2");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_resource_triple() {
        let unit = sample_unit();
        let mut escalated = unit.clone();
        escalated.max_cores = unit.max_cores + 1;
        let a = Fingerprint::compute(&unit, b"theory source");
        let b = Fingerprint::compute(&escalated, b"theory source");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_sorts_options_before_joining() {
        let mut unit = sample_unit();
        unit.tamarin_options = vec!["b".to_string(), "a".to_string()];
        let mut reordered = unit.clone();
        reordered.tamarin_options = vec!["a".to_string(), "b".to_string()];
        let a = Fingerprint::compute(&unit, b"theory source");
        let b = Fingerprint::compute(&reordered, b"theory source");
        assert_eq!(a, b);
    }

    #[test]
    fn put_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mut cache = ResultCache::open(tmp.path()).unwrap();
        let unit = sample_unit();
        let fp = Fingerprint::compute(&unit, b"theory");
        let verdict = Verdict::falsified("secrecy", "attack found");
        cache.put(&fp, &verdict).unwrap();
        let fetched = cache.get(&fp).unwrap();
        assert_eq!(fetched.lemma(), "secrecy");
    }

    #[test]
    fn miss_on_unknown_fingerprint() {
        let tmp = TempDir::new().unwrap();
        let cache = ResultCache::open(tmp.path()).unwrap();
        let unit = sample_unit();
        let fp = Fingerprint::compute(&unit, b"theory");
        assert!(cache.get(&fp).is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let unit = sample_unit();
        let fp = Fingerprint::compute(&unit, b"theory");
        {
            let mut cache = ResultCache::open(tmp.path()).unwrap();
            cache.put(&fp, &Verdict::verified("secrecy")).unwrap();
        }
        let cache = ResultCache::open(tmp.path()).unwrap();
        assert!(cache.get(&fp).is_some());
    }
}
