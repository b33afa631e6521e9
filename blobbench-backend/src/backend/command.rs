//! Backend that shells out to an external transfer tool per operation.
//!
//! Each operation is described by an argv template. Every occurrence of `{key}` in an argument is
//! replaced with the object key. Uploads pipe the payload into the child's stdin, downloads read
//! the object from its stdout, so the tool must support streaming (for example `azcopy` with
//! `--from-to PipeBlob`, or `aws s3 cp - s3://bucket/{key}`).

use std::io::ErrorKind;
use std::pin::pin;
use std::process::Stdio;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::process::Command;
use tokio_util::io::StreamReader;

use super::{Backend, DeleteOutcome};
use crate::error::{BackendError, BackendResult};
use crate::stream::PayloadStream;

const KEY_PLACEHOLDER: &str = "{key}";

/// Argv templates for the external tool.
#[derive(Clone, Debug, Default)]
pub struct CommandConfig {
    /// Uploads stdin to `{key}`.
    pub put: Vec<String>,
    /// Writes the object at `{key}` to stdout.
    pub get: Vec<String>,
    /// Deletes the object at `{key}`.
    pub delete: Vec<String>,
    /// Creates the container. Skipped when empty.
    pub create: Vec<String>,
    /// Exit codes of `get` and `delete` that mean the object does not exist.
    pub not_found_exit_codes: Vec<i32>,
}

/// Runs one external process per operation.
#[derive(Debug)]
pub struct CommandBackend {
    config: CommandConfig,
}

impl CommandBackend {
    /// Validates the templates and creates the backend.
    pub fn new(config: CommandConfig) -> BackendResult<Self> {
        for (name, template) in [
            ("put", &config.put),
            ("get", &config.get),
            ("delete", &config.delete),
        ] {
            if template.is_empty() {
                return Err(BackendError::Config(format!("`{name}` command is empty")));
            }
        }

        Ok(Self { config })
    }

    fn is_not_found(&self, output: &std::process::Output) -> bool {
        output
            .status
            .code()
            .is_some_and(|code| self.config.not_found_exit_codes.contains(&code))
    }
}

fn build_command(template: &[String], key: &str) -> Command {
    let mut args = template.iter().map(|arg| arg.replace(KEY_PLACEHOLDER, key));
    // Templates are validated to be non-empty on construction.
    let program = args.next().unwrap_or_default();
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    command
}

fn check_status(template: &[String], output: &std::process::Output) -> BackendResult<()> {
    if output.status.success() {
        return Ok(());
    }

    Err(BackendError::Command {
        program: template.first().cloned().unwrap_or_default(),
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    })
}

#[async_trait::async_trait]
impl Backend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn ensure_container(&self) -> BackendResult<()> {
        if self.config.create.is_empty() {
            return Ok(());
        }

        let output = build_command(&self.config.create, "")
            .stdin(Stdio::null())
            .output()
            .await?;
        check_status(&self.config.create, &output)
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn put_object(&self, key: &str, _len: u64, stream: PayloadStream) -> BackendResult<()> {
        let mut child = build_command(&self.config.put, key)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("child stdin was not captured"))?;

        let feed = async move {
            let mut reader = pin!(StreamReader::new(stream));
            let copied = tokio::io::copy(&mut reader, &mut stdin).await;
            // Closing stdin signals end of input to the child.
            drop(stdin);
            match copied {
                // The tool may exit before consuming all input; its exit status decides.
                Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other.map(|_| ()),
            }
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        check_status(&self.config.put, &output)?;
        fed?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn get_object(&self, key: &str) -> BackendResult<Option<PayloadStream>> {
        let output = build_command(&self.config.get, key)
            .stdin(Stdio::null())
            .output()
            .await?;
        if self.is_not_found(&output) {
            tracing::debug!("Object not found");
            return Ok(None);
        }
        check_status(&self.config.get, &output)?;

        let bytes = Bytes::from(output.stdout);
        Ok(Some(futures_util::stream::once(async move { Ok(bytes) }).boxed()))
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn delete_object(&self, key: &str) -> BackendResult<DeleteOutcome> {
        let output = build_command(&self.config.delete, key)
            .stdin(Stdio::null())
            .output()
            .await?;
        if self.is_not_found(&output) {
            return Ok(DeleteOutcome::NotFound);
        }
        check_status(&self.config.delete, &output)?;

        Ok(DeleteOutcome::Deleted)
    }
}
