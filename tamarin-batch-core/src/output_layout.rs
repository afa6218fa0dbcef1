//! The batch's on-disk output directory layout: `success/`, `failed/`,
//! `proofs/`, `traces/`, `wellformedness-check-report/`, and the final
//! `execution_report.json`. Reuses the same confirmation types as
//! [`crate::resources`] to gate wiping a non-empty output directory
//! rather than silently overwriting whatever a prior run left behind.

use std::path::{Path, PathBuf};

use crate::resources::{AutoAccept, StdinPrompt};

/// Abstracts over how an operator confirms wiping a non-empty output
/// directory, mirroring [`crate::resources::ResourceConfirmation`]'s
/// shape for a different decision.
pub trait OverwriteConfirmation: Send + Sync {
    /// Returns `true` to wipe `path` in place, `false` to leave it alone
    /// (the caller falls back to a timestamped sibling directory).
    fn confirm_overwrite(&self, path: &Path) -> bool;
}

impl OverwriteConfirmation for AutoAccept {
    fn confirm_overwrite(&self, _path: &Path) -> bool {
        true
    }
}

impl OverwriteConfirmation for StdinPrompt {
    fn confirm_overwrite(&self, path: &Path) -> bool {
        use std::io::Write;
        println!("Output directory {} already exists and is not empty.", path.display());
        print!("Wipe it? [y/N] (no creates a timestamped sibling instead) ");
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

/// The resolved set of subdirectories and files a batch writes under its
/// output root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub success_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub proofs_dir: PathBuf,
    pub traces_dir: PathBuf,
    pub wellformedness_dir: PathBuf,
    pub report_path: PathBuf,
}

impl OutputLayout {
    fn new(root: PathBuf) -> Self {
        OutputLayout {
            success_dir: root.join("success"),
            failed_dir: root.join("failed"),
            proofs_dir: root.join("proofs"),
            traces_dir: root.join("traces"),
            wellformedness_dir: root.join("wellformedness-check-report"),
            report_path: root.join("execution_report.json"),
            root,
        }
    }

    /// Resolves the output directory a batch should actually write to:
    /// if `output_directory` exists and has entries, asks `confirmer`
    /// whether to wipe it; a `false` answer falls back to a timestamped
    /// sibling directory instead of ever silently overwriting prior
    /// output. Creates every subdirectory before returning.
    pub fn prepare(
        output_directory: &Path,
        confirmer: &dyn OverwriteConfirmation,
    ) -> std::io::Result<Self> {
        let root = if directory_is_nonempty(output_directory)? {
            if confirmer.confirm_overwrite(output_directory) {
                std::fs::remove_dir_all(output_directory)?;
                output_directory.to_path_buf()
            } else {
                timestamped_sibling(output_directory)
            }
        } else {
            output_directory.to_path_buf()
        };

        let layout = OutputLayout::new(root);
        layout.create_dirs()?;
        Ok(layout)
    }

    fn create_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.success_dir,
            &self.failed_dir,
            &self.proofs_dir,
            &self.traces_dir,
            &self.wellformedness_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn directory_is_nonempty(path: &Path) -> std::io::Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn timestamped_sibling(path: &Path) -> PathBuf {
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("output");
    path.with_file_name(format!("{file_name}-{stamp}"))
}
