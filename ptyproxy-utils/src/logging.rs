//! Tracing subscriber setup
//!
//! The filter is read from `PTYPROXY_LOG` (EnvFilter syntax) and falls back
//! to the preset's level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{paths, PtyProxyError, Result};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "PTYPROXY_LOG";

/// Name of the log file inside [`paths::log_dir`]
const LOG_FILE_NAME: &str = "ptyproxy.log";

/// Where log records go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    /// `ptyproxy.log` under the state directory
    File,
    Both,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub output: LogOutput,
    /// e.g. "warn" or "ptyproxy=debug,tokio=warn"
    pub filter: String,
    /// Record source file and line
    pub file_line: bool,
}

impl LogConfig {
    /// Warnings on stderr, for a host that leaves stderr alone
    pub fn interactive() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: filter_from_env("warn"),
            file_line: false,
        }
    }

    /// Everything at info into the log file, for a host that owns the terminal
    pub fn embedded() -> Self {
        Self {
            output: LogOutput::File,
            filter: filter_from_env("info"),
            file_line: true,
        }
    }
}

fn filter_from_env(fallback: &str) -> String {
    std::env::var(LOG_ENV).unwrap_or_else(|_| fallback.to_string())
}

/// Install the global subscriber described by `config`.
///
/// Fails on an unparsable filter or when a subscriber is already installed.
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| PtyProxyError::config(format!("Invalid log filter: {}", e)))?;

    let stderr_layer = matches!(config.output, LogOutput::Stderr | LogOutput::Both).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(config.file_line)
            .with_line_number(config.file_line)
    });

    let file_layer = match config.output {
        LogOutput::File | LogOutput::Both => Some(
            fmt::layer()
                .with_writer(open_log_file()?)
                .with_ansi(false)
                .with_file(config.file_line)
                .with_line_number(config.file_line),
        ),
        LogOutput::Stderr => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| PtyProxyError::internal(format!("Failed to init logging: {}", e)))
}

/// Open the append-only log file, creating the log directory as needed
fn open_log_file() -> Result<std::fs::File> {
    let log_dir = paths::log_dir();
    paths::ensure_dir(&log_dir).map_err(|e| PtyProxyError::FileWrite {
        path: log_dir.clone(),
        source: e,
    })?;

    let log_path = log_dir.join(LOG_FILE_NAME);
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| PtyProxyError::FileWrite {
            path: log_path,
            source: e,
        })
}
