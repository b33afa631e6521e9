//! Bounded concurrent dispatch of transfers.
//!
//! [`run_batch`] runs one transfer per object key on its own task, with a semaphore capping the
//! number of transfers in flight. It waits for every transfer before returning, so the measured
//! wall-clock span covers the whole batch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::transfer::{Operation, TransferResult};

/// All results of one batch of transfers.
#[derive(Debug)]
pub struct Batch {
    /// The operation every transfer of this batch performed.
    pub operation: Operation,
    /// One result per key, in the order the keys were given.
    pub results: Vec<TransferResult>,
    /// Wall-clock time from the first dispatch until the last transfer finished.
    pub elapsed: Duration,
}

impl Batch {
    /// Number of transfers that were attempted, including failed and cancelled ones.
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    /// Number of transfers that succeeded.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Keys of all successful transfers.
    pub fn successful_keys(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.key.as_str())
    }
}

enum Dispatch {
    Spawned(String, JoinHandle<Result<Duration, TransferError>>),
    Skipped(String),
}

/// Runs `transfer` for every key with at most `concurrency` transfers in flight.
///
/// Failed transfers are recorded in their result and never abort sibling transfers. Once `cancel`
/// fires, no further transfers are dispatched and the remaining keys are recorded as
/// [`TransferError::Cancelled`]; transfers already in flight run to completion.
///
/// A `concurrency` of zero is treated as one.
pub async fn run_batch<F, Fut>(
    operation: Operation,
    keys: &[String],
    concurrency: usize,
    cancel: &CancellationToken,
    transfer: F,
) -> Batch
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Duration, TransferError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let start = Instant::now();

    let mut dispatched = Vec::with_capacity(keys.len());
    for key in keys {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
        };

        let Some(permit) = permit else {
            dispatched.push(Dispatch::Skipped(key.clone()));
            continue;
        };

        let task = transfer(key.clone());
        let handle = tokio::spawn(async move {
            let outcome = task.await;
            drop(permit);
            outcome
        });
        dispatched.push(Dispatch::Spawned(key.clone(), handle));
    }

    let mut results = Vec::with_capacity(dispatched.len());
    for dispatch in dispatched {
        let (key, outcome) = match dispatch {
            Dispatch::Skipped(key) => (key, Err(TransferError::Cancelled)),
            Dispatch::Spawned(key, handle) => match handle.await {
                Ok(outcome) => (key, outcome),
                Err(error) => {
                    tracing::error!(
                        key = key.as_str(),
                        error = &error as &dyn std::error::Error,
                        "transfer task failed"
                    );
                    (key, Err(TransferError::Panicked))
                }
            },
        };

        results.push(TransferResult {
            key,
            operation,
            outcome,
        });
    }

    let elapsed = start.elapsed();
    tracing::debug!(
        %operation,
        attempted = results.len(),
        ?elapsed,
        "batch finished"
    );

    Batch {
        operation,
        results,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use blobbench_backend::BackendError;

    use super::*;

    const STEP: Duration = Duration::from_secs(1);

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("test_blob_{i}")).collect()
    }

    async fn sleep_transfer(_key: String) -> Result<Duration, TransferError> {
        tokio::time::sleep(STEP).await;
        Ok(STEP)
    }

    #[tokio::test(start_paused = true)]
    async fn one_result_per_key_regardless_of_pool_size() {
        let keys = keys(7);
        for concurrency in [1, 2, 7, 64] {
            let batch = run_batch(
                Operation::Put,
                &keys,
                concurrency,
                &CancellationToken::new(),
                sleep_transfer,
            )
            .await;

            assert_eq!(batch.attempted(), 7);
            assert_eq!(batch.succeeded(), 7);
            let result_keys: Vec<_> = batch.results.iter().map(|r| r.key.clone()).collect();
            assert_eq!(result_keys, keys);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn serial_pool_adds_up_durations() {
        let batch = run_batch(
            Operation::Put,
            &keys(3),
            1,
            &CancellationToken::new(),
            sleep_transfer,
        )
        .await;

        assert!(batch.elapsed >= 3 * STEP);
        assert!(batch.elapsed < 3 * STEP + STEP / 10);
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_pool_overlaps_durations() {
        let single = run_batch(
            Operation::Get,
            &keys(4),
            64,
            &CancellationToken::new(),
            sleep_transfer,
        )
        .await;
        let double = run_batch(
            Operation::Get,
            &keys(8),
            64,
            &CancellationToken::new(),
            sleep_transfer,
        )
        .await;

        assert!(single.elapsed < STEP + STEP / 10);
        assert!(double.elapsed < STEP + STEP / 10);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_concurrency_runs_serially() {
        let batch = run_batch(
            Operation::Put,
            &keys(2),
            0,
            &CancellationToken::new(),
            sleep_transfer,
        )
        .await;

        assert_eq!(batch.succeeded(), 2);
        assert!(batch.elapsed >= 2 * STEP);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_pool_size() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let batch = run_batch(
            Operation::Put,
            &keys(10),
            3,
            &CancellationToken::new(),
            |_key| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(STEP).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(STEP)
                }
            },
        )
        .await;

        assert_eq!(batch.succeeded(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_abort_siblings() {
        let keys = keys(4);
        let batch = run_batch(
            Operation::Put,
            &keys,
            2,
            &CancellationToken::new(),
            |key| async move {
                tokio::time::sleep(STEP).await;
                if key == "test_blob_2" {
                    return Err(TransferError::Backend(BackendError::Config(
                        "injected".into(),
                    )));
                }
                Ok(STEP)
            },
        )
        .await;

        assert_eq!(batch.attempted(), 4);
        assert_eq!(batch.succeeded(), 3);
        assert!(batch.results[2].error().is_some());
        assert_eq!(batch.results[2].elapsed(), None);
        let successful: Vec<_> = batch.successful_keys().collect();
        assert_eq!(successful, ["test_blob_0", "test_blob_1", "test_blob_3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_still_complete() {
        let batch = run_batch(
            Operation::Get,
            &keys(3),
            2,
            &CancellationToken::new(),
            |key| async move { Err(TransferError::NotFound(key)) },
        )
        .await;

        assert_eq!(batch.attempted(), 3);
        assert_eq!(batch.succeeded(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_transfer_is_recorded() {
        let batch = run_batch(
            Operation::Put,
            &keys(2),
            2,
            &CancellationToken::new(),
            |key| async move {
                if key == "test_blob_0" {
                    panic!("boom");
                }
                Ok(STEP)
            },
        )
        .await;

        assert!(matches!(
            batch.results[0].error(),
            Some(TransferError::Panicked)
        ));
        assert!(batch.results[1].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_dispatch() {
        let cancel = CancellationToken::new();
        let started = Arc::new(AtomicUsize::new(0));

        let batch = run_batch(Operation::Put, &keys(5), 1, &cancel, |_key| {
            let cancel = cancel.clone();
            let started = Arc::clone(&started);
            async move {
                // Cancel while the second transfer is in flight.
                if started.fetch_add(1, Ordering::SeqCst) == 1 {
                    cancel.cancel();
                }
                tokio::time::sleep(STEP).await;
                Ok(STEP)
            }
        })
        .await;

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(batch.attempted(), 5);
        assert_eq!(batch.succeeded(), 2);
        assert!(
            batch.results[2..]
                .iter()
                .all(|r| matches!(r.error(), Some(TransferError::Cancelled)))
        );
    }
}
