//! A scripted [`Backend`] wrapper for exercising failure and timing behavior.
//!
//! [`FaultyBackend`] delegates to an [`InMemoryBackend`], optionally sleeping before every
//! operation and failing operations for selected keys. It also records the peak number of
//! operations in flight, which lets tests assert on worker pool bounds.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use blobbench_backend::{
    Backend, BackendError, BackendResult, DeleteOutcome, InMemoryBackend, PayloadStream,
};

/// An in-memory backend with injected latency and failures.
#[derive(Debug, Clone, Default)]
pub struct FaultyBackend {
    inner: InMemoryBackend,
    latency: Duration,
    failing_puts: Arc<HashSet<String>>,
    failing_gets: Arc<HashSet<String>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl FaultyBackend {
    /// Creates a backend that behaves like a plain [`InMemoryBackend`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `latency` before every operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails uploads of the given keys.
    pub fn fail_puts<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_puts = Arc::new(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Fails downloads of the given keys.
    pub fn fail_gets<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing_gets = Arc::new(keys.into_iter().map(Into::into).collect());
        self
    }

    /// The wrapped store, for inspecting its contents.
    pub fn store(&self) -> &InMemoryBackend {
        &self.inner
    }

    /// The highest number of operations that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn injected(key: &str) -> BackendError {
    BackendError::Io(io::Error::new(
        io::ErrorKind::ConnectionReset,
        format!("injected failure for `{key}`"),
    ))
}

#[async_trait::async_trait]
impl Backend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn ensure_container(&self) -> BackendResult<()> {
        self.inner.ensure_container().await
    }

    async fn put_object(&self, key: &str, len: u64, stream: PayloadStream) -> BackendResult<()> {
        let _guard = self.enter().await;
        if self.failing_puts.contains(key) {
            return Err(injected(key));
        }
        self.inner.put_object(key, len, stream).await
    }

    async fn get_object(&self, key: &str) -> BackendResult<Option<PayloadStream>> {
        let _guard = self.enter().await;
        if self.failing_gets.contains(key) {
            return Err(injected(key));
        }
        self.inner.get_object(key).await
    }

    async fn delete_object(&self, key: &str) -> BackendResult<DeleteOutcome> {
        self.inner.delete_object(key).await
    }
}
