//! In-memory backend for dry runs and tests.
//!
//! The backend is [`Clone`] so tests can hold a handle for direct inspection while the benchmark
//! owns a boxed copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;

use super::{Backend, DeleteOutcome};
use crate::error::BackendResult;
use crate::stream::{PayloadStream, read_to_bytes};

/// Keeps objects in a process-local map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    store: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the stored bytes, if present.
    pub fn get_stored(&self, key: &str) -> Option<Bytes> {
        self.store.lock().unwrap().get(key).cloned()
    }

    /// Returns `true` if the backend contains an entry for the given key.
    pub fn contains(&self, key: &str) -> bool {
        self.store.lock().unwrap().contains_key(key)
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Returns `true` if the backend has no stored objects.
    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().is_empty()
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_container(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn put_object(&self, key: &str, _len: u64, stream: PayloadStream) -> BackendResult<()> {
        let bytes = read_to_bytes(stream).await?;
        self.store.lock().unwrap().insert(key.to_owned(), bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> BackendResult<Option<PayloadStream>> {
        let entry = self.store.lock().unwrap().get(key).cloned();
        Ok(entry.map(|bytes| futures_util::stream::once(async move { Ok(bytes) }).boxed()))
    }

    async fn delete_object(&self, key: &str) -> BackendResult<DeleteOutcome> {
        let removed = self.store.lock().unwrap().remove(key);
        Ok(match removed {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}
