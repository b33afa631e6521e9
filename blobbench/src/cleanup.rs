//! Removal of remote objects and local files after a run.
//!
//! Cleanup is idempotent: anything that is already gone is logged and skipped, and no failure
//! here ever aborts the benchmark.

use std::io;
use std::path::PathBuf;

use blobbench_backend::{Backend, DeleteOutcome};
use yansi::Paint;

/// Counts of what a cleanup pass did.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CleanupReport {
    /// Objects or files that existed and were removed.
    pub removed: usize,
    /// Objects or files that did not exist.
    pub missing: usize,
    /// Objects or files that could not be removed.
    pub failed: usize,
}

impl CleanupReport {
    /// Adds the counts of `other` to this report.
    pub fn merge(&mut self, other: CleanupReport) {
        self.removed += other.removed;
        self.missing += other.missing;
        self.failed += other.failed;
    }

    /// Prints the totals to stdout.
    pub fn print(&self) {
        println!();
        print!(
            "{} ({} removed, {} missing",
            "## CLEANUP".bold(),
            self.removed.bold(),
            self.missing
        );
        if self.failed > 0 {
            print!(", {}", format!("{} FAILED", self.failed).bold().red());
        }
        println!(")");
    }
}

/// Deletes `keys` from the backend with up to `concurrency` deletes in flight.
pub async fn delete_remote(
    backend: &dyn Backend,
    keys: &[String],
    concurrency: usize,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    let results = backend.delete_objects(keys, concurrency).await;

    for (key, result) in keys.iter().zip(results) {
        match result {
            Ok(DeleteOutcome::Deleted) => {
                tracing::debug!(key = key.as_str(), "deleted object");
                report.removed += 1;
            }
            Ok(DeleteOutcome::NotFound) => {
                tracing::info!(key = key.as_str(), "object not found, skipping");
                report.missing += 1;
            }
            Err(error) => {
                tracing::warn!(
                    key = key.as_str(),
                    error = &error as &dyn std::error::Error,
                    "failed to delete object"
                );
                report.failed += 1;
            }
        }
    }

    report
}

/// Removes local files produced by a run.
pub async fn delete_local<I>(paths: I) -> CleanupReport
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut report = CleanupReport::default();

    for path in paths {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed local file");
                report.removed += 1;
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "local file not found, skipping");
                report.missing += 1;
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = &error as &dyn std::error::Error,
                    "failed to remove local file"
                );
                report.failed += 1;
            }
        }
    }

    report
}
