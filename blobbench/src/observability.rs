use std::env;
use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{LogFormat, Logging};

/// Installs the global tracing subscriber, writing to stderr.
pub fn init_tracing(logging: &Logging) {
    let (level, env_filter) = parse_rust_log(logging.level);

    let format = match logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let layer = match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Simplified => layer.with_ansi(false).compact().boxed(),
        LogFormat::Pretty | LogFormat::Auto => layer.boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(level))
        .with(env_filter)
        .init();
}

/// Determines the effective log level and the per-crate filter.
///
/// `RUST_LOG` takes precedence over the configured level. If it is not a plain level, it is used
/// literally as the filter.
pub fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        hyper_util=WARN,\
        reqwest=WARN,\
        blobbench=TRACE,\
        blobbench_backend=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_configured_level() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RUST_LOG", "debug");
            let (level, _) = parse_rust_log(LevelFilter::WARN);
            assert_eq!(level, LevelFilter::DEBUG);

            jail.set_env("RUST_LOG", "blobbench_backend=trace");
            let (level, filter) = parse_rust_log(LevelFilter::WARN);
            assert_eq!(level, LevelFilter::TRACE);
            assert!(
                filter
                    .to_string()
                    .to_lowercase()
                    .contains("blobbench_backend=trace")
            );

            Ok(())
        });
    }
}
