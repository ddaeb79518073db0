use std::fs;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::paths;

/// Default filter when `RUST_LOG` is unset. Symphonia logs every probed
/// frame at debug level.
pub const DEFAULT_FILTER: &str = "info,symphonia=warn";

/// Initialize structured logging.
///
/// - File output: daily rolling `minion.*.log` in `{data_dir}/logs`,
///   keeping the latest 5 files.
/// - Console output on stderr. Stdout carries IPC and must stay clean.
/// - Filter from `RUST_LOG`, defaulting to [`DEFAULT_FILTER`].
///
/// If the log directory cannot be used, only the stderr layer is installed.
/// Returns an error if a global subscriber is already set.
pub fn init() -> Result<(), String> {
    let log_dir = paths::get_log_dir();
    let _ = fs::create_dir_all(&log_dir);

    let file_layer = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("minion")
        .filename_suffix("log")
        .max_log_files(5)
        .build(&log_dir)
    {
        Ok(appender) => Some(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
        ),
        Err(e) => {
            eprintln!("File logging disabled ({}): {}", log_dir.display(), e);
            None
        }
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| format!("Logger already initialized: {}", e))?;

    tracing::info!(log_dir = %log_dir.display(), "Logger initialized");
    Ok(())
}
