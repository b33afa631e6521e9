//! Configuration for the benchmark.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line overrides (see [`Overrides`])
//! 2. Environment variables (prefixed with `BLOBBENCH__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `BLOBBENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `BLOBBENCH__OBJECTS=100` sets the number of objects per phase
//! - `BLOBBENCH__BACKEND__TYPE=azure` selects the Azure backend
//! - `BLOBBENCH__BACKEND__CREDENTIAL=sv=...` sets the SAS token
//!
//! # YAML Configuration File
//!
//! ```yaml
//! payload_size: 64 MiB
//! objects: 10
//! workers: 10
//! prefix: test_blob
//!
//! backend:
//!   type: azure
//!   account: storageblobtest01
//!   container: testcontainer
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;
use std::time::Duration;

use anyhow::Result;
use blobbench_backend::{AzureConfig, BackendConfig, CommandConfig, S3CompatibleConfig};
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, ExposeSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::report::ThroughputBasis;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "BLOBBENCH__";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

fn expose(secret: &Option<SecretBox<ConfigSecret>>) -> Option<String> {
    secret
        .as_ref()
        .map(|secret| secret.expose_secret().as_str().to_owned())
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

/// Storage backend configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Storage {
    /// Local filesystem storage backend (type `"filesystem"`).
    ///
    /// ```yaml
    /// backend:
    ///   type: filesystem
    ///   path: /mnt/bench
    /// ```
    FileSystem {
        /// Directory used as the container. Created during setup.
        path: PathBuf,
    },

    /// Process-local storage (type `"memory"`), useful for dry runs of the driver itself.
    Memory,

    /// S3-compatible storage backend (type `"s3compatible"`).
    ///
    /// ```yaml
    /// backend:
    ///   type: s3compatible
    ///   endpoint: http://localhost:9000
    ///   bucket: bench
    ///   path_style: true
    /// ```
    S3Compatible {
        /// S3 endpoint URL. Defaults to the AWS endpoint of `region`.
        endpoint: Option<String>,
        /// Bucket name. Created during setup if it does not exist.
        bucket: String,
        /// Bucket region.
        ///
        /// Defaults to `us-east-1`.
        #[serde(default = "default_region")]
        region: String,
        /// Use path-style addressing, required by most self-hosted deployments.
        #[serde(default)]
        path_style: bool,
        /// Timeout for each request, for example `30s`.
        #[serde(default, with = "humantime_serde")]
        request_timeout: Option<Duration>,
        /// Access key id.
        access_key: Option<String>,
        /// Secret access key.
        credential: Option<SecretBox<ConfigSecret>>,
    },

    /// Azure Blob Storage backend (type `"azure"`).
    ///
    /// ```yaml
    /// backend:
    ///   type: azure
    ///   account: storageblobtest01
    ///   container: testcontainer
    ///   credential: "sv=2022-11-02&ss=b&sig=..."
    /// ```
    Azure {
        /// Storage account name.
        #[serde(default)]
        account: String,
        /// Container name. Created during setup if it does not exist.
        container: String,
        /// Blob service endpoint, for example an Azurite emulator.
        endpoint: Option<String>,
        /// Shared Access Signature token.
        credential: Option<SecretBox<ConfigSecret>>,
        /// Timeout for each request, for example `5m`.
        #[serde(default, with = "humantime_serde")]
        request_timeout: Option<Duration>,
    },

    /// External transfer tool (type `"command"`).
    ///
    /// Every argument may contain `{key}`, which is replaced by the object key.
    ///
    /// ```yaml
    /// backend:
    ///   type: command
    ///   put: [aws, s3, cp, "-", "s3://bench/{key}"]
    ///   get: [aws, s3, cp, "s3://bench/{key}", "-"]
    ///   delete: [aws, s3, rm, "s3://bench/{key}"]
    ///   not_found_exit_codes: [3]
    /// ```
    Command {
        /// Uploads stdin to `{key}`.
        put: Vec<String>,
        /// Writes `{key}` to stdout.
        get: Vec<String>,
        /// Deletes `{key}`.
        delete: Vec<String>,
        /// Creates the container, if needed.
        #[serde(default)]
        create: Vec<String>,
        /// Exit codes of `get` and `delete` that mean the object does not exist.
        #[serde(default)]
        not_found_exit_codes: Vec<i32>,
    },
}

impl Storage {
    /// Converts this into the backend crate's configuration, exposing secrets.
    pub fn backend_config(&self) -> BackendConfig {
        match self {
            Storage::FileSystem { path } => BackendConfig::FileSystem { path: path.clone() },
            Storage::Memory => BackendConfig::Memory,
            Storage::S3Compatible {
                endpoint,
                bucket,
                region,
                path_style,
                request_timeout,
                access_key,
                credential,
            } => BackendConfig::S3Compatible(S3CompatibleConfig {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                path_style: *path_style,
                request_timeout: *request_timeout,
                access_key: access_key.clone(),
                secret_key: expose(credential),
            }),
            Storage::Azure {
                account,
                container,
                endpoint,
                credential,
                request_timeout,
            } => BackendConfig::Azure(AzureConfig {
                account: account.clone(),
                container: container.clone(),
                endpoint: endpoint.clone(),
                sas_token: expose(credential),
                request_timeout: *request_timeout,
            }),
            Storage::Command {
                put,
                get,
                delete,
                create,
                not_found_exit_codes,
            } => BackendConfig::Command(CommandConfig {
                put: put.clone(),
                get: get.clone(),
                delete: delete.clone(),
                create: create.clone(),
                not_found_exit_codes: not_found_exit_codes.clone(),
            }),
        }
    }
}

/// Where uploads read the payload from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadSource {
    /// Stream the shared in-memory buffer.
    Memory,
    /// Open and stream the payload file for every upload.
    File,
}

/// Where downloads write the object to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSink {
    /// Write each object to `downloaded_{key}.bin` in the work directory.
    File,
    /// Read the object and drop its contents.
    Discard,
}

/// Runtime configuration for the Tokio async runtime.
#[derive(Debug, Deserialize, Serialize)]
pub struct Runtime {
    /// Number of worker threads for the server runtime.
    ///
    /// # Default
    ///
    /// Number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `BLOBBENCH__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serializes sizes as a plain byte count.
///
/// `ByteSize` itself serializes to a rounded display string such as `1.5 GiB`.
mod byte_count {
    use bytesize::ByteSize;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(size: &ByteSize, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(size.as_u64())
    }

    pub fn serialize_opt<S: Serializer>(
        size: &Option<ByteSize>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match size {
            Some(size) => serialize(size, serializer),
            None => serializer.serialize_none(),
        }
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, leaving stdout to the benchmark summary.
#[derive(Debug, Deserialize, Serialize)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable takes precedence if set.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `BLOBBENCH__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `BLOBBENCH__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Benchmark configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// The storage backend to benchmark.
    ///
    /// # Default
    ///
    /// A `filesystem` backend in `blobbench-data`.
    pub backend: Storage,

    /// Size of every object.
    ///
    /// # Default
    ///
    /// `64 MiB`
    #[serde(serialize_with = "byte_count::serialize")]
    pub payload_size: ByteSize,

    /// Number of objects uploaded and downloaded per phase.
    ///
    /// # Default
    ///
    /// `10`
    pub objects: usize,

    /// Maximum number of concurrent transfers.
    ///
    /// # Default
    ///
    /// `10`
    pub workers: usize,

    /// Object keys are named `{prefix}_{index}`.
    ///
    /// # Default
    ///
    /// `test_blob`
    pub prefix: String,

    /// Directory for the payload file and downloaded objects.
    ///
    /// # Default
    ///
    /// The current directory.
    pub work_dir: PathBuf,

    /// Where uploads read the payload from.
    ///
    /// # Default
    ///
    /// `file`
    pub upload_source: UploadSource,

    /// Where downloads write to.
    ///
    /// # Default
    ///
    /// `file`
    pub download_sink: DownloadSink,

    /// Which object count throughput is computed over.
    ///
    /// # Default
    ///
    /// `successful`
    pub throughput_basis: ThroughputBasis,

    /// Whether to delete remote objects and local files after the run.
    ///
    /// # Default
    ///
    /// `true`
    pub cleanup: bool,

    /// Configuration of the internal task runtime.
    pub runtime: Runtime,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Storage::FileSystem {
                path: PathBuf::from("blobbench-data"),
            },
            payload_size: ByteSize::mib(64),
            objects: 10,
            workers: 10,
            prefix: "test_blob".to_owned(),
            work_dir: PathBuf::from("."),
            upload_source: UploadSource::File,
            download_sink: DownloadSink::File,
            throughput_basis: ThroughputBasis::Successful,
            cleanup: true,
            runtime: Runtime::default(),
            logging: Logging::default(),
        }
    }
}

/// Backend settings that can be given on the command line.
#[derive(Debug, Default, Serialize)]
pub struct BackendOverrides {
    /// Overrides `backend.endpoint`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Overrides `backend.credential`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl BackendOverrides {
    fn is_empty(&self) -> bool {
        self.endpoint.is_none() && self.credential.is_none()
    }
}

/// Settings given on the command line, taking precedence over all other sources.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "byte_count::serialize_opt"
    )]
    pub payload_size: Option<ByteSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<bool>,
    #[serde(skip_serializing_if = "BackendOverrides::is_empty")]
    pub backend: BackendOverrides,
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `BLOBBENCH__`)
    /// 4. Command line overrides
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    /// - Required fields are missing or invalid
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;

        Ok(config)
    }
}
