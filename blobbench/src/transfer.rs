//! Single timed uploads and downloads against the backend.

use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use blobbench_backend::{Backend, PayloadStream};
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::config::{DownloadSink, UploadSource};
use crate::error::TransferError;
use crate::payload::{CHUNK_SIZE, Payload};

/// The kind of transfer performed in a batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    /// Upload of the payload.
    Put,
    /// Download of a previously uploaded object.
    Get,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Put => f.write_str("PUT"),
            Operation::Get => f.write_str("GET"),
        }
    }
}

/// The outcome of one transfer of one object.
#[derive(Debug)]
pub struct TransferResult {
    /// Key of the transferred object.
    pub key: String,
    /// Whether this was an upload or a download.
    pub operation: Operation,
    /// Time spent in the transfer, or why it failed.
    pub outcome: Result<Duration, TransferError>,
}

impl TransferResult {
    /// Elapsed time of a successful transfer, `None` if it failed.
    pub fn elapsed(&self) -> Option<Duration> {
        self.outcome.as_ref().ok().copied()
    }

    /// The failure of this transfer, if any.
    pub fn error(&self) -> Option<&TransferError> {
        self.outcome.as_ref().err()
    }

    /// Returns `true` if the transfer succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Local file a downloaded object is written to.
///
/// Slashes in the key are flattened so that all downloads land directly in `work_dir`.
pub fn download_path(work_dir: &Path, key: &str) -> PathBuf {
    work_dir.join(format!("downloaded_{}.bin", key.replace('/', "_")))
}

/// Performs timed transfers of the run's payload.
///
/// One worker is shared by all concurrent transfers of a run; it only holds read-only state.
#[derive(Debug)]
pub struct TransferWorker {
    backend: Arc<dyn Backend>,
    payload: Payload,
    source: UploadSource,
    payload_path: PathBuf,
    sink: DownloadSink,
    work_dir: PathBuf,
}

impl TransferWorker {
    /// Creates a worker transferring `payload` to and from `backend`.
    ///
    /// `payload_path` must contain the persisted payload if `source` is [`UploadSource::File`].
    pub fn new(
        backend: Arc<dyn Backend>,
        payload: Payload,
        source: UploadSource,
        payload_path: PathBuf,
        sink: DownloadSink,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            backend,
            payload,
            source,
            payload_path,
            sink,
            work_dir,
        }
    }

    /// Uploads the payload to `key` and returns the time it took.
    ///
    /// Failures are logged here with the key, so callers only need to record them.
    pub async fn upload(&self, key: &str) -> Result<Duration, TransferError> {
        let result = self.try_upload(key).await;
        if let Err(ref error) = result {
            tracing::error!(
                key,
                error = error as &dyn std::error::Error,
                "error uploading object"
            );
        }
        result
    }

    /// Downloads `key` into the download sink and returns the time it took.
    pub async fn download(&self, key: &str) -> Result<Duration, TransferError> {
        let result = self.try_download(key).await;
        if let Err(ref error) = result {
            tracing::error!(
                key,
                error = error as &dyn std::error::Error,
                "error downloading object"
            );
        }
        result
    }

    async fn upload_stream(&self) -> Result<PayloadStream, TransferError> {
        Ok(match self.source {
            UploadSource::Memory => self.payload.stream(),
            UploadSource::File => {
                let file = tokio::fs::File::open(&self.payload_path).await?;
                ReaderStream::with_capacity(file, CHUNK_SIZE).boxed()
            }
        })
    }

    async fn try_upload(&self, key: &str) -> Result<Duration, TransferError> {
        let start = Instant::now();
        let stream = self.upload_stream().await?;
        self.backend
            .put_object(key, self.payload.len(), stream)
            .await?;
        Ok(start.elapsed())
    }

    async fn try_download(&self, key: &str) -> Result<Duration, TransferError> {
        let start = Instant::now();
        let stream = self
            .backend
            .get_object(key)
            .await?
            .ok_or_else(|| TransferError::NotFound(key.to_owned()))?;

        match self.sink {
            DownloadSink::File => {
                let file = tokio::fs::File::create(download_path(&self.work_dir, key)).await?;
                let mut reader = pin!(StreamReader::new(stream));
                let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
                tokio::io::copy(&mut reader, &mut writer).await?;
                writer.flush().await?;
            }
            DownloadSink::Discard => {
                stream.try_for_each(|_chunk| async { Ok(()) }).await?;
            }
        }

        Ok(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use blobbench_backend::InMemoryBackend;
    use bytesize::ByteSize;

    use super::*;

    struct Fixture {
        backend: InMemoryBackend,
        payload: Payload,
        tempdir: tempfile::TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let tempdir = tempfile::tempdir().unwrap();
            let payload = Payload::generate(ByteSize::kib(16)).unwrap();
            payload
                .persist(&tempdir.path().join("payload.bin"))
                .await
                .unwrap();

            Self {
                backend: InMemoryBackend::new(),
                payload,
                tempdir,
            }
        }

        fn worker(&self, source: UploadSource, sink: DownloadSink) -> TransferWorker {
            TransferWorker::new(
                Arc::new(self.backend.clone()),
                self.payload.clone(),
                source,
                self.tempdir.path().join("payload.bin"),
                sink,
                self.tempdir.path().to_owned(),
            )
        }
    }

    #[test]
    fn download_path_flattens_keys() {
        assert_eq!(
            download_path(Path::new("/tmp"), "runs/test_blob_0"),
            Path::new("/tmp/downloaded_runs_test_blob_0.bin")
        );
    }

    #[tokio::test]
    async fn uploads_from_memory_and_file() {
        let fixture = Fixture::new().await;

        for (key, source) in [("mem", UploadSource::Memory), ("file", UploadSource::File)] {
            let worker = fixture.worker(source, DownloadSink::Discard);
            worker.upload(key).await.unwrap();
            assert_eq!(
                fixture.backend.get_stored(key).unwrap(),
                *fixture.payload.as_bytes()
            );
        }
    }

    #[tokio::test]
    async fn download_writes_local_file() {
        let fixture = Fixture::new().await;
        let worker = fixture.worker(UploadSource::Memory, DownloadSink::File);

        worker.upload("test_blob_0").await.unwrap();
        worker.download("test_blob_0").await.unwrap();

        let path = download_path(fixture.tempdir.path(), "test_blob_0");
        let contents = tokio::fs::read(path).await.unwrap();
        assert_eq!(contents, fixture.payload.as_bytes().as_ref());
    }

    #[tokio::test]
    async fn missing_object_is_reported_not_raised() {
        let fixture = Fixture::new().await;
        let worker = fixture.worker(UploadSource::Memory, DownloadSink::File);

        let result = worker.download("missing").await;
        assert!(matches!(result, Err(TransferError::NotFound(key)) if key == "missing"));
        assert!(!download_path(fixture.tempdir.path(), "missing").exists());
    }

    #[tokio::test]
    async fn missing_payload_file_fails_upload() {
        let fixture = Fixture::new().await;
        tokio::fs::remove_file(fixture.tempdir.path().join("payload.bin"))
            .await
            .unwrap();
        let worker = fixture.worker(UploadSource::File, DownloadSink::Discard);

        let result = worker.upload("test_blob_0").await;
        assert!(matches!(result, Err(TransferError::Io(_))));
        assert!(fixture.backend.is_empty());
    }
}
