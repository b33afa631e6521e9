//! Azure Blob Storage over its REST API.
//!
//! Requests are authorized with a Shared Access Signature appended to every URL, so no request
//! signing happens here. See <https://learn.microsoft.com/rest/api/storageservices/put-blob>.

use std::fmt;
use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, StatusCode, Url};

use super::{Backend, DeleteOutcome, reqwest_client};
use crate::error::{BackendError, BackendResult};
use crate::stream::PayloadStream;

/// Service version sent with every request. Single-shot `Put Blob` allows up to 5000 MiB here.
const API_VERSION: &str = "2021-08-06";

/// Connection settings for an Azure Blob Storage container.
#[derive(Clone, Default)]
pub struct AzureConfig {
    /// Storage account name, used to derive the default endpoint.
    pub account: String,
    /// Container holding the benchmark blobs.
    pub container: String,
    /// Blob service endpoint. Defaults to `https://{account}.blob.core.windows.net`.
    pub endpoint: Option<String>,
    /// Shared Access Signature query string, with or without the leading `?`.
    pub sas_token: Option<String>,
    /// Timeout applied to every request.
    pub request_timeout: Option<Duration>,
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account", &self.account)
            .field("container", &self.container)
            .field("endpoint", &self.endpoint)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Stores objects as block blobs in an Azure container.
pub struct AzureBackend {
    client: reqwest::Client,
    container_url: Url,
    sas_token: Option<String>,
}

impl AzureBackend {
    /// Creates a backend for the configured container.
    pub fn new(config: AzureConfig) -> BackendResult<Self> {
        if config.container.is_empty() {
            return Err(BackendError::Config("container name is empty".into()));
        }

        let endpoint = match config.endpoint {
            Some(endpoint) => endpoint,
            None if !config.account.is_empty() => {
                format!("https://{}.blob.core.windows.net", config.account)
            }
            None => {
                return Err(BackendError::Config(
                    "either an account name or an endpoint is required".into(),
                ));
            }
        };

        let sas_token = config
            .sas_token
            .map(|token| token.trim_start_matches('?').to_owned())
            .filter(|token| !token.is_empty());

        let mut container_url = Url::parse(&endpoint)
            .map_err(|err| BackendError::Config(format!("invalid endpoint `{endpoint}`: {err}")))?;
        container_url
            .path_segments_mut()
            .map_err(|()| BackendError::Config(format!("endpoint `{endpoint}` is not a base URL")))?
            .pop_if_empty()
            .push(&config.container);

        Ok(Self {
            client: reqwest_client(config.request_timeout)?,
            container_url,
            sas_token,
        })
    }

    /// Builds the URL of the container or of the blob at `key`.
    ///
    /// Key segments are percent-encoded, slashes in the key keep their meaning as virtual
    /// directories.
    fn url(&self, key: Option<&str>, query: Option<&str>) -> Url {
        let mut url = self.container_url.clone();
        if let Some(key) = key {
            // The container URL was checked to be a base URL on construction.
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.extend(key.split('/'));
            }
        }

        let params: Vec<&str> = query.into_iter().chain(self.sas_token.as_deref()).collect();
        if !params.is_empty() {
            url.set_query(Some(&params.join("&")));
        }

        url
    }
}

impl fmt::Debug for AzureBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Azure")
            .field("container_url", &self.container_url)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Backend for AzureBackend {
    fn name(&self) -> &'static str {
        "azure"
    }

    async fn ensure_container(&self) -> BackendResult<()> {
        let response = self
            .client
            .put(self.url(None, Some("restype=container")))
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("creating container", cause))?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            StatusCode::CONFLICT => {
                tracing::debug!("Container already exists");
                Ok(())
            }
            status => Err(BackendError::Status {
                context: "creating container".into(),
                status,
            }),
        }
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn put_object(&self, key: &str, len: u64, stream: PayloadStream) -> BackendResult<()> {
        tracing::debug!("Writing to azure backend");
        let response = self
            .client
            .put(self.url(Some(key), None))
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-type", "BlockBlob")
            .header(CONTENT_LENGTH, len)
            .body(Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("uploading blob", cause))?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(BackendError::Status {
                context: "uploading blob".into(),
                status,
            }),
        }
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn get_object(&self, key: &str) -> BackendResult<Option<PayloadStream>> {
        tracing::debug!("Reading from azure backend");
        let response = self
            .client
            .get(self.url(Some(key), None))
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("downloading blob", cause))?;

        match response.status() {
            StatusCode::OK => {
                let stream = response.bytes_stream().map_err(std::io::Error::other);
                Ok(Some(stream.boxed()))
            }
            StatusCode::NOT_FOUND => {
                tracing::debug!("Object not found");
                Ok(None)
            }
            status => Err(BackendError::Status {
                context: "downloading blob".into(),
                status,
            }),
        }
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn delete_object(&self, key: &str) -> BackendResult<DeleteOutcome> {
        tracing::debug!("Deleting from azure backend");
        let response = self
            .client
            .delete(self.url(Some(key), None))
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(|cause| BackendError::reqwest("deleting blob", cause))?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            status => Err(BackendError::Status {
                context: "deleting blob".into(),
                status,
            }),
        }
    }
}
