use std::fmt::Debug;
use std::time::Duration;

use futures_util::StreamExt;

use crate::error::{BackendError, BackendResult};
use crate::stream::PayloadStream;

mod azure;
mod command;
mod in_memory;
mod local_fs;
mod s3_compatible;
#[cfg(test)]
mod test_server;

pub use azure::{AzureBackend, AzureConfig};
pub use command::{CommandBackend, CommandConfig};
pub use in_memory::InMemoryBackend;
pub use local_fs::LocalFs;
pub use s3_compatible::{S3CompatibleBackend, S3CompatibleConfig};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("blobbench/", env!("CARGO_PKG_VERSION"));

/// A type-erased [`Backend`] instance.
pub type BoxedBackend = Box<dyn Backend>;

/// Whether a delete removed an object or found nothing to remove.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    /// The object existed and was removed.
    Deleted,
    /// The object did not exist.
    NotFound,
}

/// An object storage service holding named objects in a single container.
#[async_trait::async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// The backend name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Creates the container, succeeding if it already exists.
    async fn ensure_container(&self) -> BackendResult<()>;

    /// Stores or overwrites the object at `key` with `len` bytes read from `stream`.
    async fn put_object(&self, key: &str, len: u64, stream: PayloadStream) -> BackendResult<()>;

    /// Retrieves the object at `key`, or `None` if it does not exist.
    async fn get_object(&self, key: &str) -> BackendResult<Option<PayloadStream>>;

    /// Deletes the object at `key`.
    async fn delete_object(&self, key: &str) -> BackendResult<DeleteOutcome>;

    /// Deletes many objects, running up to `concurrency` deletes at once.
    ///
    /// Returns one result per key, in the order of `keys`.
    async fn delete_objects(
        &self,
        keys: &[String],
        concurrency: usize,
    ) -> Vec<BackendResult<DeleteOutcome>> {
        let mut deletes = Vec::with_capacity(keys.len());
        for key in keys {
            deletes.push(self.delete_object(key));
        }

        futures_util::stream::iter(deletes)
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

/// Creates a reqwest client with required defaults.
///
/// `timeout` bounds every request from connecting until the response body has been read.
pub(crate) fn reqwest_client(timeout: Option<Duration>) -> BackendResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder
        .build()
        .map_err(|cause| BackendError::reqwest("building http client", cause))
}
