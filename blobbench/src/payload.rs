//! Generation of the random payload shared by all uploads of a run.

use std::path::Path;

use blobbench_backend::PayloadStream;
use bytes::Bytes;
use bytesize::ByteSize;
use futures::StreamExt;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tokio::io::AsyncWriteExt;

use crate::error::SetupError;

/// Size of the chunks yielded by [`Payload::stream`] and read from the payload file.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Randomized contents uploaded to every object of a run.
///
/// The bytes come from an RNG seeded with OS entropy, so backends cannot shortcut transfers with
/// compression or deduplication. Cloning is cheap and shares the underlying buffer.
#[derive(Clone, Debug)]
pub struct Payload {
    bytes: Bytes,
}

impl Payload {
    /// Generates a payload of exactly `size` random bytes.
    pub fn generate(size: ByteSize) -> Result<Self, SetupError> {
        let len = usize::try_from(size.as_u64()).map_err(|_| SetupError::Allocation { size })?;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| SetupError::Allocation { size })?;
        buffer.resize(len, 0);

        let mut rng = SmallRng::from_rng(&mut rand::rng());
        rng.fill_bytes(&mut buffer);

        Ok(Self {
            bytes: buffer.into(),
        })
    }

    /// The length of the payload in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns `true` for a zero-sized payload.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The payload contents.
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Streams the payload in [`CHUNK_SIZE`] chunks without copying.
    pub fn stream(&self) -> PayloadStream {
        let bytes = self.bytes.clone();
        let len = bytes.len();
        let chunks = (0..len)
            .step_by(CHUNK_SIZE)
            .map(move |start| {
                Ok::<_, std::io::Error>(bytes.slice(start..len.min(start + CHUNK_SIZE)))
            });

        futures::stream::iter(chunks).boxed()
    }

    /// Writes the payload to `path`, replacing any existing file.
    pub async fn persist(&self, path: &Path) -> Result<(), SetupError> {
        let write = async {
            let mut file = tokio::fs::File::create(path).await?;
            file.write_all(&self.bytes).await?;
            file.flush().await?;
            file.sync_data().await
        };

        write.await.map_err(|cause| SetupError::Write {
            path: path.to_owned(),
            cause,
        })
    }
}

#[cfg(test)]
mod tests {
    use blobbench_backend::read_to_bytes;

    use super::*;

    #[test]
    fn has_exact_length() {
        for size in [0, 1, 1000, CHUNK_SIZE as u64 + 7] {
            let payload = Payload::generate(ByteSize::b(size)).unwrap();
            assert_eq!(payload.len(), size);
        }
    }

    #[test]
    fn generations_differ() {
        let first = Payload::generate(ByteSize::kib(64)).unwrap();
        let second = Payload::generate(ByteSize::kib(64)).unwrap();
        assert_ne!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn oversized_payload_is_a_setup_error() {
        let result = Payload::generate(ByteSize::b(u64::MAX));
        assert!(matches!(result, Err(SetupError::Allocation { .. })));
    }

    #[tokio::test]
    async fn streams_in_chunks() {
        let payload = Payload::generate(ByteSize::b(2 * CHUNK_SIZE as u64 + 1)).unwrap();

        let chunk_sizes: Vec<_> = payload
            .stream()
            .map(|chunk| chunk.unwrap().len())
            .collect()
            .await;
        assert_eq!(chunk_sizes, [CHUNK_SIZE, CHUNK_SIZE, 1]);

        let contents = read_to_bytes(payload.stream()).await.unwrap();
        assert_eq!(&contents, payload.as_bytes());
    }

    #[tokio::test]
    async fn persists_to_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("payload.bin");
        let payload = Payload::generate(ByteSize::kib(4)).unwrap();

        payload.persist(&path).await.unwrap();

        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written, payload.as_bytes().as_ref());
    }

    #[tokio::test]
    async fn persist_reports_path_on_failure() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("missing").join("payload.bin");
        let payload = Payload::generate(ByteSize::b(16)).unwrap();

        let err = payload.persist(&path).await.unwrap_err();
        assert!(matches!(err, SetupError::Write { path: p, .. } if p == path));
    }
}
