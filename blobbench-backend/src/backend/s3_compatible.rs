use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, BucketConfiguration, Region};

use super::{Backend, DeleteOutcome};
use crate::error::{BackendError, BackendResult};
use crate::stream::{PayloadStream, read_to_bytes};

/// Connection settings for an S3-compatible bucket.
#[derive(Clone, Default)]
pub struct S3CompatibleConfig {
    /// Name of the bucket, created on setup if missing.
    pub bucket: String,
    /// Region of the bucket.
    pub region: String,
    /// Custom endpoint, such as a MinIO deployment. Defaults to AWS.
    pub endpoint: Option<String>,
    /// Use path-style instead of virtual-host-style addressing.
    pub path_style: bool,
    /// Timeout applied to every request.
    pub request_timeout: Option<Duration>,
    /// Access key id. Falls back to the environment when unset.
    pub access_key: Option<String>,
    /// Secret access key. Falls back to the environment when unset.
    pub secret_key: Option<String>,
}

impl fmt::Debug for S3CompatibleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3CompatibleConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("path_style", &self.path_style)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Stores objects in an S3-compatible bucket.
pub struct S3CompatibleBackend {
    bucket: Box<Bucket>,
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3CompatibleBackend {
    /// Creates a new S3 compatible backend bound to the given bucket.
    pub fn new(config: S3CompatibleConfig) -> BackendResult<Self> {
        if config.bucket.is_empty() {
            return Err(BackendError::Config("bucket name is empty".into()));
        }

        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|err| BackendError::Config(format!("invalid s3 credentials: {err}")))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: match config.endpoint {
                Some(endpoint) => endpoint,
                None => format!("s3-{}.amazonaws.com", config.region),
            },
        };

        let mut bucket = Bucket::new(&config.bucket, region.clone(), credentials.clone())
            .map_err(|cause| BackendError::s3("creating bucket handle", cause))?;

        if config.path_style {
            bucket = bucket.with_path_style();
        }

        if let Some(request_timeout) = config.request_timeout {
            bucket = bucket
                .with_request_timeout(request_timeout)
                .map_err(|cause| BackendError::s3("configuring request timeout", cause))?;
        }

        Ok(Self {
            bucket,
            region,
            credentials,
            path_style: config.path_style,
        })
    }
}

impl fmt::Debug for S3CompatibleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Compatible")
            .field("bucket", &self.bucket.name())
            .field("endpoint", &self.bucket.host())
            .finish_non_exhaustive()
    }
}

fn is_status(err: &S3Error, status: u16) -> bool {
    matches!(err, S3Error::HttpFailWithBody(code, _) if *code == status)
}

#[async_trait::async_trait]
impl Backend for S3CompatibleBackend {
    fn name(&self) -> &'static str {
        "s3-compatible"
    }

    async fn ensure_container(&self) -> BackendResult<()> {
        let name = self.bucket.name();
        let config = BucketConfiguration::default();
        let created = if self.path_style {
            Bucket::create_with_path_style(
                &name,
                self.region.clone(),
                self.credentials.clone(),
                config,
            )
            .await
        } else {
            Bucket::create(&name, self.region.clone(), self.credentials.clone(), config).await
        };

        match created {
            Ok(response) if response.success() => Ok(()),
            // BucketAlreadyOwnedByYou / BucketAlreadyExists
            Ok(response) if response.response_code == 409 => Ok(()),
            Ok(response) => Err(BackendError::Config(format!(
                "creating bucket `{name}` failed with status {}: {}",
                response.response_code, response.response_text
            ))),
            Err(err) if is_status(&err, 409) => Ok(()),
            Err(cause) => Err(BackendError::s3("creating bucket", cause)),
        }
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn put_object(&self, key: &str, _len: u64, stream: PayloadStream) -> BackendResult<()> {
        tracing::debug!("Writing to s3_compatible backend");
        let contents = read_to_bytes(stream).await?;
        self.bucket
            .put_object(key, &contents)
            .await
            .map_err(|cause| BackendError::s3("uploading object", cause))?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn get_object(&self, key: &str) -> BackendResult<Option<PayloadStream>> {
        tracing::debug!("Reading from s3_compatible backend");

        let response = match self.bucket.get_object(key).await {
            Ok(response) => response,
            Err(err) if is_status(&err, 404) => {
                tracing::debug!("Object not found");
                return Ok(None);
            }
            Err(cause) => return Err(BackendError::s3("downloading object", cause)),
        };
        if response.status_code() == 404 {
            tracing::debug!("Object not found");
            return Ok(None);
        }

        let bytes = Bytes::from(response.to_vec());
        Ok(Some(futures_util::stream::once(async move { Ok(bytes) }).boxed()))
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn delete_object(&self, key: &str) -> BackendResult<DeleteOutcome> {
        tracing::debug!("Deleting from s3_compatible backend");
        // S3 answers deletes of missing keys with 204, so they cannot be told apart.
        match self.bucket.delete_object(key).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(err) if is_status(&err, 404) => Ok(DeleteOutcome::NotFound),
            Err(cause) => Err(BackendError::s3("deleting object", cause)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_server::OneShot;

    #[test]
    fn debug_output_hides_credentials() {
        let config = S3CompatibleConfig {
            bucket: "bench".into(),
            region: "us-east-1".into(),
            access_key: Some("AKIDEXAMPLE".into()),
            secret_key: Some("very-secret".into()),
            ..Default::default()
        };

        let debug = format!("{config:?}");
        assert!(debug.contains("bench"));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("AKIDEXAMPLE"));
    }

    #[test]
    fn rejects_empty_bucket() {
        let result = S3CompatibleBackend::new(S3CompatibleConfig::default());
        assert!(matches!(result, Err(BackendError::Config(_))));
    }

    fn local_backend(server: &OneShot) -> S3CompatibleBackend {
        S3CompatibleBackend::new(S3CompatibleConfig {
            bucket: "bench".into(),
            region: "us-east-1".into(),
            endpoint: Some(server.url.clone()),
            path_style: true,
            access_key: Some("AKIDEXAMPLE".into()),
            secret_key: Some("very-secret".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn matches_http_status() {
        let err = S3Error::HttpFailWithBody(404, "NoSuchKey".into());
        assert!(is_status(&err, 404));
        assert!(!is_status(&err, 409));
    }

    #[tokio::test]
    async fn existing_bucket_is_accepted() {
        let body = b"<Error><Code>BucketAlreadyOwnedByYou</Code></Error>";
        let server = OneShot::respond(409, body).await;
        local_backend(&server).ensure_container().await.unwrap();
        assert!(server.request_head().await.starts_with("put /bench"));
    }

    #[tokio::test]
    async fn missing_object_is_none() {
        let server = OneShot::respond(404, b"<Error><Code>NoSuchKey</Code></Error>").await;
        let result = local_backend(&server).get_object("missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn downloads_object() {
        let server = OneShot::respond(200, b"hello").await;
        let stream = local_backend(&server)
            .get_object("test_blob_0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read_to_bytes(stream).await.unwrap().as_ref(), b"hello");
        assert!(server.request_head().await.starts_with("get /bench/test_blob_0 "));
    }

    #[tokio::test]
    async fn deletes_object() {
        let server = OneShot::respond(204, b"").await;
        let outcome = local_backend(&server)
            .delete_object("test_blob_0")
            .await
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
    }

    #[tokio::test]
    async fn delete_fails_on_server_error() {
        let body = b"<Error><Code>InternalError</Code></Error>";
        let server = OneShot::respond(500, body).await;
        let err = local_backend(&server)
            .delete_object("test_blob_0")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::S3 { .. }));
    }
}
