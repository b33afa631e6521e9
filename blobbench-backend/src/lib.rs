//! Storage backends for the throughput benchmark.
//!
//! Every backend implements the [`Backend`] trait, a minimal put/get/delete capability over named
//! objects in a single container. The benchmark driver treats backends as opaque and shares one
//! handle across all of its workers, so every implementation is `Send + Sync`.
//!
//! Use [`from_config`] to construct a type-erased backend from a [`BackendConfig`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod backend;
mod error;
mod stream;

use std::path::PathBuf;

pub use backend::{
    AzureConfig, Backend, BoxedBackend, CommandConfig, DeleteOutcome, InMemoryBackend, LocalFs,
    S3CompatibleConfig, USER_AGENT,
};
pub use error::{BackendError, BackendResult};
pub use stream::{PayloadStream, make_stream, read_to_bytes};

/// Configuration to initialize a [`Backend`].
#[derive(Debug)]
pub enum BackendConfig {
    /// Use a local directory as the container.
    FileSystem {
        /// The directory where objects will be stored.
        path: PathBuf,
    },
    /// Keep objects in process memory.
    Memory,
    /// Use an S3-compatible bucket.
    S3Compatible(S3CompatibleConfig),
    /// Use an Azure Blob Storage container.
    Azure(AzureConfig),
    /// Shell out to an external transfer tool.
    Command(CommandConfig),
}

/// Creates a type-erased backend from the given configuration.
pub fn from_config(config: BackendConfig) -> BackendResult<BoxedBackend> {
    let backend: BoxedBackend = match config {
        BackendConfig::FileSystem { path } => Box::new(LocalFs::new(&path)),
        BackendConfig::Memory => Box::new(InMemoryBackend::new()),
        BackendConfig::S3Compatible(config) => Box::new(backend::S3CompatibleBackend::new(config)?),
        BackendConfig::Azure(config) => Box::new(backend::AzureBackend::new(config)?),
        BackendConfig::Command(config) => Box::new(backend::CommandBackend::new(config)?),
    };

    tracing::debug!(backend = backend.name(), "initialized storage backend");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_filesystem_backend() {
        let backend = from_config(BackendConfig::FileSystem {
            path: PathBuf::from("unused"),
        })
        .unwrap();
        assert_eq!(backend.name(), "filesystem");
    }

    #[test]
    fn rejects_empty_command_templates() {
        let result = from_config(BackendConfig::Command(CommandConfig::default()));
        assert!(matches!(result, Err(BackendError::Config(_))));
    }
}
