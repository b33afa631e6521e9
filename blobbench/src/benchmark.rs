//! Orchestration of a full benchmark run.
//!
//! A run sets up the work directory, the destination container and the payload, then uploads the
//! payload to every object key, downloads every key again, and finally cleans up. Each phase is
//! timed as a whole and summarized by [`RunSummary`].

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use blobbench_backend::Backend;
use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::cleanup::{self, CleanupReport};
use crate::config::{Config, DownloadSink, UploadSource};
use crate::error::{SetupError, TransferError};
use crate::payload::Payload;
use crate::report::{self, Report, RunSummary, ThroughputBasis};
use crate::runner::{self, Batch};
use crate::transfer::{self, Operation, TransferWorker};

/// Name of the payload file in the work directory.
pub const PAYLOAD_FILE: &str = "payload.bin";

/// The validated, immutable parameters of a run.
#[derive(Clone, Debug)]
pub struct BenchmarkConfig {
    /// Size of every object.
    pub payload_size: ByteSize,
    /// Number of objects per phase.
    pub objects: usize,
    /// Maximum number of concurrent transfers.
    pub workers: usize,
    /// Prefix of all object keys.
    pub prefix: String,
    /// Directory for the payload file and downloads.
    pub work_dir: PathBuf,
    /// Where uploads read from.
    pub upload_source: UploadSource,
    /// Where downloads write to.
    pub download_sink: DownloadSink,
    /// Which count throughput is computed over.
    pub throughput_basis: ThroughputBasis,
    /// Whether to clean up after the run.
    pub cleanup: bool,
}

impl BenchmarkConfig {
    /// Validates the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        if config.objects == 0 {
            return Err(SetupError::Config("`objects` must be at least 1".into()));
        }
        if config.workers == 0 {
            return Err(SetupError::Config("`workers` must be at least 1".into()));
        }
        if config.payload_size.as_u64() == 0 {
            return Err(SetupError::Config("`payload_size` must not be zero".into()));
        }
        if config.prefix.is_empty() {
            return Err(SetupError::Config("`prefix` must not be empty".into()));
        }

        Ok(Self {
            payload_size: config.payload_size,
            objects: config.objects,
            workers: config.workers,
            prefix: config.prefix.clone(),
            work_dir: config.work_dir.clone(),
            upload_source: config.upload_source,
            download_sink: config.download_sink,
            throughput_basis: config.throughput_basis,
            cleanup: config.cleanup,
        })
    }

    /// Keys of all objects of the run, `{prefix}_{index}`.
    pub fn object_keys(&self) -> Vec<String> {
        (0..self.objects)
            .map(|index| format!("{}_{index}", self.prefix))
            .collect()
    }

    /// Path of the persisted payload.
    pub fn payload_path(&self) -> PathBuf {
        self.work_dir.join(PAYLOAD_FILE)
    }

    /// Local files written by a run: every download and the payload file.
    pub fn local_files(&self) -> Vec<PathBuf> {
        self.object_keys()
            .iter()
            .map(|key| transfer::download_path(&self.work_dir, key))
            .chain(std::iter::once(self.payload_path()))
            .collect()
    }
}

/// Runs the full benchmark against `backend`.
///
/// Only setup failures are returned as errors. Failed transfers are part of the report, and
/// cleanup runs even if `cancel` fired during the transfer phases.
pub async fn run(
    backend: Arc<dyn Backend>,
    config: &BenchmarkConfig,
    cancel: CancellationToken,
) -> Result<Report, SetupError> {
    report::print_banner(
        config.payload_size,
        config.objects,
        config.workers,
        backend.name(),
    );

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .map_err(|cause| SetupError::Write {
            path: config.work_dir.clone(),
            cause,
        })?;

    backend
        .ensure_container()
        .await
        .map_err(SetupError::Container)?;

    let payload = Payload::generate(config.payload_size)?;
    payload.persist(&config.payload_path()).await?;
    tracing::debug!(path = %config.payload_path().display(), "persisted payload");

    let worker = Arc::new(TransferWorker::new(
        Arc::clone(&backend),
        payload,
        config.upload_source,
        config.payload_path(),
        config.download_sink,
        config.work_dir.clone(),
    ));
    let keys = config.object_keys();
    let payload_size = config.payload_size.as_u64();

    let put = run_phase(Operation::Put, &keys, config, &cancel, |key| {
        let worker = Arc::clone(&worker);
        async move { worker.upload(&key).await }
    })
    .await;
    let put = RunSummary::from_batch(&put, payload_size, config.throughput_basis);
    put.print();

    let get = run_phase(Operation::Get, &keys, config, &cancel, |key| {
        let worker = Arc::clone(&worker);
        async move { worker.download(&key).await }
    })
    .await;
    let get = RunSummary::from_batch(&get, payload_size, config.throughput_basis);
    get.print();

    let cleanup = if config.cleanup {
        Some(cleanup(backend.as_ref(), config).await)
    } else {
        tracing::info!("skipping cleanup");
        None
    };

    Ok(Report { put, get, cleanup })
}

async fn run_phase<F, Fut>(
    operation: Operation,
    keys: &[String],
    config: &BenchmarkConfig,
    cancel: &CancellationToken,
    transfer: F,
) -> Batch
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Duration, TransferError>> + Send + 'static,
{
    let bar = ProgressBar::new(keys.len() as u64).with_message(format!("{operation}"));
    if let Ok(style) = ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len} {elapsed}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));

    let batch = runner::run_batch(operation, keys, config.workers, cancel, |key| {
        let bar = bar.clone();
        let task = transfer(key);
        async move {
            let outcome = task.await;
            bar.inc(1);
            outcome
        }
    })
    .await;

    bar.finish_and_clear();
    batch
}

/// Deletes the remote objects and local files of a run with the given configuration.
///
/// This is safe to run repeatedly: objects and files that are already gone are skipped.
pub async fn cleanup(backend: &dyn Backend, config: &BenchmarkConfig) -> CleanupReport {
    let keys = config.object_keys();

    let mut report = cleanup::delete_remote(backend, &keys, config.workers).await;
    report.merge(cleanup::delete_local(config.local_files()).await);

    tracing::info!(
        removed = report.removed,
        missing = report.missing,
        failed = report.failed,
        "cleanup complete"
    );
    report.print();
    report
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn config() -> Config {
        Config {
            objects: 3,
            prefix: "bench".into(),
            work_dir: PathBuf::from("/tmp/bench"),
            ..Config::default()
        }
    }

    #[test]
    fn builds_keys_from_prefix() {
        let config = BenchmarkConfig::from_config(&config()).unwrap();
        assert_eq!(config.object_keys(), ["bench_0", "bench_1", "bench_2"]);
        assert_eq!(config.payload_path(), Path::new("/tmp/bench/payload.bin"));
    }

    #[test]
    fn lists_local_files() {
        let config = BenchmarkConfig::from_config(&config()).unwrap();
        assert_eq!(
            config.local_files(),
            [
                PathBuf::from("/tmp/bench/downloaded_bench_0.bin"),
                PathBuf::from("/tmp/bench/downloaded_bench_1.bin"),
                PathBuf::from("/tmp/bench/downloaded_bench_2.bin"),
                PathBuf::from("/tmp/bench/payload.bin"),
            ]
        );
    }

    #[test]
    fn rejects_empty_runs() {
        let mut config = config();
        config.objects = 0;
        assert!(matches!(
            BenchmarkConfig::from_config(&config),
            Err(SetupError::Config(_))
        ));

        let mut config = self::config();
        config.workers = 0;
        assert!(matches!(
            BenchmarkConfig::from_config(&config),
            Err(SetupError::Config(_))
        ));

        let mut config = self::config();
        config.payload_size = ByteSize::b(0);
        assert!(matches!(
            BenchmarkConfig::from_config(&config),
            Err(SetupError::Config(_))
        ));
    }
}
