//! Structured logging setup.
//!
//! Console output always goes to stderr. When `log_file` is configured a
//! second, non-blocking writer appends plain (ANSI-free) lines to that file.
//! `RUST_LOG` takes precedence over the configured level.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("invalid log file '{0}'")]
    File(PathBuf),
    #[error("cannot create log directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = build_filter(level, std::env::var(EnvFilter::DEFAULT_ENV).ok())?;

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(file_layer)
        .try_init()?;

    if let Some(path) = log_file {
        tracing::debug!(log_file = %path.display(), "file logging enabled");
    }
    Ok(guard)
}

/// Filter from `RUST_LOG` when set, else from the configured level.
fn build_filter(level: &str, env: Option<String>) -> Result<EnvFilter, LoggingError> {
    let directives = env
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| level.to_string());
    EnvFilter::try_new(&directives).map_err(|source| LoggingError::Filter {
        filter: directives,
        source,
    })
}

fn split_log_path(path: &Path) -> Result<(PathBuf, OsString), LoggingError> {
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::File(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name.to_os_string()))
}
