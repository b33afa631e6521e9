//! Throughput computation and the printed benchmark summary.

use std::fmt;
use std::time::Duration;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use sketches_ddsketch::DDSketch;
use yansi::Paint;

use crate::cleanup::CleanupReport;
use crate::runner::Batch;
use crate::transfer::Operation;

const BYTES_PER_MB: f64 = (1024 * 1024) as f64;

/// Which transfers count towards the bytes of a throughput figure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThroughputBasis {
    /// Every attempted transfer, including failed ones.
    Attempted,
    /// Only transfers that succeeded.
    Successful,
}

/// Converts `bytes` moved in `elapsed` into MB/s, where one MB is 2^20 bytes.
///
/// Returns `0.0` if nothing was moved or no time elapsed.
pub fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / BYTES_PER_MB / secs
}

/// Aggregated outcome of one phase of the benchmark.
pub struct RunSummary {
    /// The operation of this phase.
    pub operation: Operation,
    /// Wall-clock span of the whole batch.
    pub elapsed: Duration,
    /// Number of transfers attempted.
    pub attempted: usize,
    /// Number of transfers that succeeded.
    pub succeeded: usize,
    /// Bytes counted towards [`throughput`](Self::throughput).
    pub bytes: u64,
    /// Aggregate throughput in MB/s.
    pub throughput: f64,
    /// Latencies of successful transfers, in seconds.
    pub latencies: DDSketch,
    /// Keys of failed transfers along with their error.
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    /// Summarizes a finished batch in which every object had `payload_size` bytes.
    pub fn from_batch(batch: &Batch, payload_size: u64, basis: ThroughputBasis) -> Self {
        let mut latencies = DDSketch::default();
        let mut failures = Vec::new();

        for result in &batch.results {
            match &result.outcome {
                Ok(elapsed) => latencies.add(elapsed.as_secs_f64()),
                Err(error) => failures.push((result.key.clone(), error.to_string())),
            }
        }

        let attempted = batch.attempted();
        let succeeded = batch.succeeded();
        let counted = match basis {
            ThroughputBasis::Attempted => attempted,
            ThroughputBasis::Successful => succeeded,
        };
        let bytes = payload_size.saturating_mul(counted as u64);

        Self {
            operation: batch.operation,
            elapsed: batch.elapsed,
            attempted,
            succeeded,
            bytes,
            throughput: throughput_mbps(bytes, batch.elapsed),
            latencies,
            failures,
        }
    }

    /// Number of failed transfers.
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }

    /// Prints this phase to stdout.
    pub fn print(&self) {
        let op = self.operation;

        println!();
        print!(
            "{} ({} objects",
            format!("## {op}").bold(),
            self.attempted.bold()
        );
        if !self.failures.is_empty() {
            print!(
                ", {}",
                format!("{} FAILURES", self.failures.len()).bold().red()
            );
        }
        println!(")");

        println!("Total {op} time: {:.2?}", self.elapsed.bold());
        println!(
            "{op} throughput: {} MB/s",
            format!("{:.2}", self.throughput).bold().green()
        );
        print_percentiles(&self.latencies);

        for (key, error) in &self.failures {
            println!("  {} {key}: {error}", "failed".red());
        }
    }
}

impl fmt::Debug for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunSummary")
            .field("operation", &self.operation)
            .field("elapsed", &self.elapsed)
            .field("attempted", &self.attempted)
            .field("succeeded", &self.succeeded)
            .field("bytes", &self.bytes)
            .field("throughput", &self.throughput)
            .field("latencies", &self.latencies.count())
            .field("failures", &self.failures)
            .finish()
    }
}

fn print_percentiles(sketch: &DDSketch) {
    let ops = sketch.count();
    if ops == 0 {
        return;
    }

    let quantile = |q| {
        let secs = sketch.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(secs)
    };
    let avg = Duration::from_secs_f64(sketch.sum().unwrap_or_default() / ops as f64);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);
    println!(
        "  avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        avg.bold()
    );
}

/// Prints the run banner.
pub fn print_banner(payload_size: ByteSize, objects: usize, workers: usize, backend: &str) {
    println!(
        "{} {} objects of {} against {} with {} workers",
        "Benchmarking".bold(),
        objects.bold(),
        payload_size.bold(),
        backend.bold().blue(),
        workers.bold()
    );
}

/// Everything a full benchmark run produced.
#[derive(Debug)]
pub struct Report {
    /// The upload phase.
    pub put: RunSummary,
    /// The download phase.
    pub get: RunSummary,
    /// Results of the cleanup, if it ran.
    pub cleanup: Option<CleanupReport>,
}
