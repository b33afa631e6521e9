use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use blobbench_backend::Backend;
use bytesize::ByteSize;
use tokio_util::sync::CancellationToken;

use crate::benchmark::{self, BenchmarkConfig};
use crate::config::{BackendOverrides, Config, Overrides};
use crate::error::SetupError;
use crate::observability;

/// Measure upload and download throughput of a blob storage service.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// size of every object in MiB
    #[argh(option)]
    pub payload_mb: Option<u64>,

    /// number of objects per phase
    #[argh(option, short = 'n')]
    pub objects: Option<usize>,

    /// maximum number of concurrent transfers
    #[argh(option, short = 'w')]
    pub workers: Option<usize>,

    /// prefix of the object keys
    #[argh(option)]
    pub prefix: Option<String>,

    /// endpoint of the storage service
    #[argh(option)]
    pub endpoint: Option<String>,

    /// credential for the storage service, such as a SAS token or secret key
    #[argh(option)]
    pub credential: Option<String>,

    /// keep objects and local files after the run
    #[argh(switch)]
    pub no_cleanup: bool,

    #[argh(subcommand)]
    pub command: Command,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            payload_size: self.payload_mb.map(ByteSize::mib),
            objects: self.objects,
            workers: self.workers,
            prefix: self.prefix.clone(),
            cleanup: self.no_cleanup.then_some(false),
            backend: BackendOverrides {
                endpoint: self.endpoint.clone(),
                credential: self.credential.clone(),
            },
        }
    }
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Cleanup(CleanupCommand),
    Version(VersionCommand),
}

/// run the upload and download benchmark
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// delete the objects and local files of a previous run
///
/// Objects and files that no longer exist are skipped, so this can be run repeatedly.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "cleanup")]
struct CleanupCommand {}

/// print the blobbench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("blobbench {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref(), &args.overrides())
        .context("failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("blobbench-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads.max(1))
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    let bench = BenchmarkConfig::from_config(&config)?;
    let backend: Arc<dyn Backend> = blobbench_backend::from_config(config.backend.backend_config())
        .map_err(SetupError::Backend)?
        .into();

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand {}) => {
                let cancel = CancellationToken::new();
                tokio::spawn(cancel_on_interrupt(cancel.clone()));
                benchmark::run(backend, &bench, cancel).await?;
            }
            Command::Cleanup(CleanupCommand {}) => {
                benchmark::cleanup(backend.as_ref(), &bench).await;
            }
            Command::Version(VersionCommand {}) => unreachable!(),
        }

        Ok(())
    })
}

/// Exit code of a process terminated by `SIGINT`.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Cancels the run on the first Ctrl-C and exits the process on the second.
async fn cancel_on_interrupt(cancel: CancellationToken) {
    if on_interrupts(cancel, tokio::signal::ctrl_c).await.is_ok() {
        tracing::error!("interrupted again, exiting without cleanup");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
}

/// Cancels `cancel` when `interrupt` first resolves and returns when it resolves a second time.
async fn on_interrupts<F, Fut>(cancel: CancellationToken, mut interrupt: F) -> std::io::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    interrupt().await?;
    tracing::warn!("interrupted, waiting for in-flight transfers before cleanup");
    tracing::warn!("press Ctrl-C again to exit immediately");
    cancel.cancel();

    interrupt().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = Args::from_args(
            &["blobbench"],
            &[
                "--payload-mb",
                "1",
                "-n",
                "4",
                "-w",
                "2",
                "--credential",
                "sig=abc",
                "--no-cleanup",
                "run",
            ],
        )
        .unwrap();

        let overrides = args.overrides();
        assert_eq!(overrides.payload_size, Some(ByteSize::mib(1)));
        assert_eq!(overrides.objects, Some(4));
        assert_eq!(overrides.workers, Some(2));
        assert_eq!(overrides.cleanup, Some(false));
        assert_eq!(overrides.backend.credential.as_deref(), Some("sig=abc"));
        assert!(matches!(args.command, Command::Run(_)));
    }

    #[tokio::test]
    async fn second_interrupt_returns() {
        let cancel = CancellationToken::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let rx = std::sync::Arc::new(tokio::sync::Mutex::new(rx));

        let task = tokio::spawn(on_interrupts(cancel.clone(), move || {
            let rx = rx.clone();
            async move {
                rx.lock().await.recv().await;
                Ok(())
            }
        }));

        tx.send(()).unwrap();
        cancel.cancelled().await;
        assert!(!task.is_finished());

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failed_signal_handler_does_not_cancel() {
        let cancel = CancellationToken::new();
        let result = on_interrupts(cancel.clone(), || async {
            Err(std::io::Error::other("no signal handler"))
        })
        .await;

        assert!(result.is_err());
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn cleanup_is_not_overridden_by_default() {
        let args = Args::from_args(&["blobbench"], &["cleanup"]).unwrap();

        let overrides = args.overrides();
        assert_eq!(overrides.cleanup, None);
        assert_eq!(overrides.payload_size, None);
        assert!(matches!(args.command, Command::Cleanup(_)));
    }
}
