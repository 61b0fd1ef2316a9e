//! Integration suite replay with guaranteed restoration.
//!
//! The integration suite under `<root>/spec` is snapshotted to
//! `<root>/spec-backup`, emptied, and then refilled one test file at a time so
//! that each file runs in isolation. Every exit path restores the snapshot.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::runner::TestRunner;
use crate::target::{RunnerKind, TestTarget};

/// Directory holding the integration suite, relative to the root.
pub const TEST_DIR: &str = "spec";

/// Sibling directory holding the snapshot while the suite runs.
pub const BACKUP_DIR: &str = "spec-backup";

/// Shared support code; never emptied and never replayed.
const SUPPORT_DIR: &str = "lib";

/// Names of the test files that were replayed, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteReport {
    pub ran: Vec<String>,
}

/// A full copy of the live test directory taken before any mutation.
///
/// Restoration happens through [`IntegrationSnapshot::restore`]; if that is
/// never reached (panic, dropped future) the snapshot restores itself on drop.
pub struct IntegrationSnapshot {
    live: PathBuf,
    backup: PathBuf,
    restored: bool,
}

impl IntegrationSnapshot {
    /// Copies `live` to `backup`. Refuses to overwrite an existing backup.
    pub fn create(live: &Path, backup: &Path) -> Result<Self> {
        if backup.exists() {
            return Err(Error::Snapshot {
                path: backup.to_path_buf(),
                reason: "backup directory already exists; restore or remove it first".to_string(),
            });
        }

        if let Err(e) = copy_dir_all(live, backup) {
            // Nothing has been mutated yet; drop whatever was partially copied.
            if backup.exists() {
                if let Err(cleanup) = fs::remove_dir_all(backup) {
                    tracing::warn!(error = %cleanup, backup = ?backup, "failed to remove partial snapshot");
                }
            }
            return Err(Error::Snapshot {
                path: live.to_path_buf(),
                reason: e.to_string(),
            });
        }

        tracing::debug!(live = ?live, backup = ?backup, "snapshotted integration tests");
        Ok(Self {
            live: live.to_path_buf(),
            backup: backup.to_path_buf(),
            restored: false,
        })
    }

    /// Replaces the live directory with the snapshot and removes the snapshot.
    pub fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }

        let restore_err = |reason: String| Error::Restore {
            path: self.live.clone(),
            reason,
        };

        if self.live.exists() {
            fs::remove_dir_all(&self.live)
                .map_err(|e| restore_err(format!("failed to remove live directory: {}", e)))?;
        }

        if fs::rename(&self.backup, &self.live).is_err() {
            copy_dir_all(&self.backup, &self.live)
                .map_err(|e| restore_err(format!("failed to copy snapshot back: {}", e)))?;
        }

        if self.backup.exists() {
            fs::remove_dir_all(&self.backup)
                .map_err(|e| restore_err(format!("failed to remove snapshot: {}", e)))?;
        }

        self.restored = true;
        tracing::debug!(live = ?self.live, "restored integration tests");
        Ok(())
    }
}

impl Drop for IntegrationSnapshot {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = self.restore() {
                tracing::error!(error = %e, backup = ?self.backup, "failed to restore integration tests on drop");
            }
        }
    }
}

/// Replays the integration suite one file at a time.
pub struct IntegrationHarness {
    runner: TestRunner,
}

impl IntegrationHarness {
    pub fn new(runner: TestRunner) -> Self {
        Self { runner }
    }

    /// Runs every test file under `<root>/spec` in isolation.
    ///
    /// With a non-empty `explicit_names`, only files with those names run, and
    /// names that matched no file fail with [`Error::InvalidTargetName`] once
    /// the directory has been restored.
    pub async fn run_integration_suite(
        &self,
        root: &Path,
        explicit_names: &[String],
        continue_on_errors: bool,
    ) -> Result<SuiteReport> {
        let live = root.join(TEST_DIR);
        let backup = root.join(BACKUP_DIR);

        let mut snapshot = IntegrationSnapshot::create(&live, &backup)?;
        let mut report = SuiteReport::default();

        let replayed = self
            .replay(root, &live, &backup, explicit_names, continue_on_errors, &mut report)
            .await;
        let restored = snapshot.restore();

        match (replayed, restored) {
            (Err(e), Err(restore_err)) => {
                tracing::error!(error = %e, "integration replay failed before restoration failed");
                return Err(restore_err);
            }
            (Ok(()), Err(restore_err)) => return Err(restore_err),
            (Err(e), Ok(())) => return Err(e),
            (Ok(()), Ok(())) => {}
        }

        if !explicit_names.is_empty() {
            let ran: HashSet<&str> = report.ran.iter().map(String::as_str).collect();
            let missing: Vec<String> = explicit_names
                .iter()
                .filter(|name| !ran.contains(name.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(Error::InvalidTargetName(missing));
            }
        }

        Ok(report)
    }

    async fn replay(
        &self,
        root: &Path,
        live: &Path,
        backup: &Path,
        explicit_names: &[String],
        continue_on_errors: bool,
        report: &mut SuiteReport,
    ) -> Result<()> {
        for file in test_files(live)? {
            fs::remove_file(&file)?;
        }

        for source in test_files(backup)? {
            let Some(name) = source.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if !explicit_names.is_empty() && !explicit_names.contains(&name) {
                continue;
            }

            let relative = source
                .strip_prefix(backup)
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            let dest = live.join(relative);
            fs::copy(&source, &dest)?;
            report.ran.push(name.clone());

            let target = TestTarget::new(RunnerKind::Apm, root, name);
            let start = Instant::now();
            let outcome = self.runner.run_one(&target, continue_on_errors).await;
            tracing::info!(
                target = %target.display_name(),
                "Finished in {:.1} seconds",
                start.elapsed().as_secs_f64()
            );

            fs::remove_file(&dest)?;
            outcome?;
        }

        Ok(())
    }
}

/// Collects every file under `dir`, skipping `lib` directories.
///
/// Entries are visited depth-first with siblings sorted by name, so the
/// order is the same on every platform.
pub fn test_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && entry.file_name() == SUPPORT_DIR));
    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Recursively copies `src` to `dst`, which must not exist yet.
fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).map_err(std::io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            // Parents are visited before their children.
            fs::create_dir(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
