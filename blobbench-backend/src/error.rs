use std::process::ExitStatus;

use thiserror::Error;

/// Errors returned by storage backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// IO errors related to payload streaming or file operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// All errors stemming from the reqwest client.
    ///
    /// These can be network errors encountered when sending the requests, but can also indicate
    /// failures to build the client itself.
    #[error("reqwest error: {context}")]
    Reqwest {
        context: String,
        #[source]
        cause: reqwest::Error,
    },

    /// A request was answered with a status code the backend does not expect.
    #[error("unexpected status {status} while {context}")]
    Status {
        context: String,
        status: reqwest::StatusCode,
    },

    /// Errors returned by the S3 client.
    #[error("s3 error: {context}")]
    S3 {
        context: String,
        #[source]
        cause: s3::error::S3Error,
    },

    /// An external command exited unsuccessfully.
    #[error("command `{program}` failed with {status}: {stderr}")]
    Command {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The backend configuration is invalid.
    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    pub(crate) fn reqwest(context: impl Into<String>, cause: reqwest::Error) -> Self {
        Self::Reqwest {
            context: context.into(),
            cause,
        }
    }

    pub(crate) fn s3(context: impl Into<String>, cause: s3::error::S3Error) -> Self {
        Self::S3 {
            context: context.into(),
            cause,
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
