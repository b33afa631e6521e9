use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::pin;

use futures_util::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::{ReaderStream, StreamReader};

use super::{Backend, DeleteOutcome};
use crate::error::BackendResult;
use crate::stream::PayloadStream;

/// Stores objects as files below a local directory.
#[derive(Debug)]
pub struct LocalFs {
    path: PathBuf,
}

impl LocalFs {
    /// Creates a backend rooted at `path`.
    pub fn new(path: &Path) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Backend for LocalFs {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn ensure_container(&self) -> BackendResult<()> {
        tokio::fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn put_object(&self, key: &str, _len: u64, stream: PayloadStream) -> BackendResult<()> {
        let path = self.path.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;

        let mut reader = pin!(StreamReader::new(stream));
        let mut writer = BufWriter::new(file);

        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        let file = writer.into_inner();
        file.sync_data().await?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn get_object(&self, key: &str) -> BackendResult<Option<PayloadStream>> {
        let path = self.path.join(key);
        let file = match OpenOptions::new().read(true).open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!("Object not found");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Some(ReaderStream::new(file).boxed()))
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn delete_object(&self, key: &str) -> BackendResult<DeleteOutcome> {
        let path = self.path.join(key);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
            Err(err) => Err(err.into()),
        }
    }
}
