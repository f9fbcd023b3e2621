/// Tracing subscriber setup for the ingest binaries.
///
/// Progress, rate-limit hits and rotation events are emitted as structured
/// `tracing` events. They go to stderr and, when configured, are appended
/// to a log file that the dashboard tails.

use crate::config::{LogFormat, LoggingConfig};
use std::fs::{File, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing from `LoggingConfig`.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is
/// harmless: the second global subscriber is silently refused.
///
/// The stderr layer is always installed. An error means only the log file
/// could not be opened.
pub fn init_tracing(config: &LoggingConfig) -> std::io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, open_error) = match &config.file {
        Some(path) => match open_log_file(path) {
            Ok(file) => (Some(Mutex::new(file)), None),
            Err(e) => (None, Some(e)),
        },
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    let _ = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(log_file.map(|file| fmt::layer().json().with_ansi(false).with_writer(file)))
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(log_file.map(|file| fmt::layer().with_ansi(false).with_writer(file)))
            .try_init(),
    };

    match open_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn open_log_file(path: &str) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
