//! Tracing subscriber setup.
//!
//! Logs go to stderr, and optionally to a file through a non-blocking
//! writer. `RUST_LOG` overrides the configured level when it is set.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry, EnvFilter};

/// Default log directives.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directives, e.g. `info` or `dlcsync=debug`.
    pub level: String,

    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Set the filter directives.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the log file.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Errors from logging setup.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },

    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log file path has no file name: {0}")]
    InvalidFile(PathBuf),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Directives to use: `RUST_LOG` if set and non-empty, else the configured level.
fn directives(config: &LoggingConfig) -> String {
    match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => config.level.clone(),
    }
}

fn build_filter(directives: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::builder()
        .parse(directives)
        .map_err(|e| LoggingError::InvalidFilter {
            directives: directives.to_string(),
            reason: e.to_string(),
        })
}

/// Install the global tracing subscriber.
///
/// Returns the file writer's guard when a log file is configured; keep it
/// alive for as long as logs should be flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = build_filter(&directives(config))?;

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(LocalTime::new(Rfc3339))
        .with_target(false);

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| LoggingError::InvalidFile(path.clone()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            fs::create_dir_all(&dir).map_err(|e| LoggingError::CreateDir {
                path: dir.clone(),
                source: e,
            })?;

            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTime::new(Rfc3339));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(guard)
}
