//! Error types for the benchmark driver.

use std::io;
use std::path::PathBuf;

use blobbench_backend::BackendError;
use bytesize::ByteSize;
use thiserror::Error;

/// Fatal errors that abort the run before any transfer is attempted.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The configuration values are unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The storage backend could not be constructed.
    #[error("failed to initialize backend")]
    Backend(#[source] BackendError),

    /// The destination container or bucket could not be created.
    #[error("failed to create destination container")]
    Container(#[source] BackendError),

    /// The payload buffer could not be allocated.
    #[error("failed to allocate payload of {size}")]
    Allocation { size: ByteSize },

    /// A local file or directory required for the run could not be written.
    #[error("failed to write `{}`", path.display())]
    Write {
        path: PathBuf,
        #[source]
        cause: io::Error,
    },
}

/// Errors of a single transfer, recorded in its result instead of aborting the batch.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The backend rejected or failed the operation.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The object to download does not exist.
    #[error("object `{0}` not found")]
    NotFound(String),

    /// Reading the upload source or writing the download sink failed.
    #[error("local i/o error: {0}")]
    Io(#[from] io::Error),

    /// The run was cancelled before this transfer was dispatched.
    #[error("transfer cancelled")]
    Cancelled,

    /// The task running this transfer panicked.
    #[error("transfer task panicked")]
    Panicked,
}
