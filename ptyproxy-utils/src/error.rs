//! Error types for ptyproxy
//!
//! Provides a unified error type used across the ptyproxy crates.

use std::path::PathBuf;

/// Main error type for ptyproxy operations
#[derive(Debug, thiserror::Error)]
pub enum PtyProxyError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Helper Process Errors ===

    #[error("Helper executable not found: {0}")]
    HelperNotFound(String),

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PtyProxyError {
    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::ProcessSpawn(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether no bridge could be started because of this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HelperNotFound(_) | Self::ProcessSpawn(_))
    }
}

/// Result type alias using PtyProxyError
pub type Result<T> = std::result::Result<T, PtyProxyError>;
