//! Tracing subscriber setup for the `utmbuild` binary.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};
use utmbuild_shared::errors::{BuildError, BuildResult};

/// Log file prefix; the appender adds the date.
const LOG_FILE_PREFIX: &str = "utmbuild.log";

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Directive used when `RUST_LOG` is unset, e.g. `info` or `utmbuild=debug`.
    pub default_directive: Option<String>,
    /// Also write logs, without ANSI colours, to a daily file in this directory.
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init_logging(options: &LoggingOptions) -> BuildResult<Option<WorkerGuard>> {
    let directive = options.default_directive.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .map_err(|e| BuildError::Config(format!("invalid log filter {:?}: {}", directive, e)))?;

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                BuildError::Storage(format!(
                    "failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BuildError::Internal(format!("failed to install logger: {}", e)))?;

    Ok(guard)
}
