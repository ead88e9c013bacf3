//! ptyproxy-utils: Common utilities shared across ptyproxy crates
//!
//! This crate provides:
//! - Unified error types ([`PtyProxyError`], [`Result`])
//! - Logging infrastructure ([`init_logging_with_config`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)
//! - Helper executable lookup ([`find_helper`])

pub mod error;
pub mod helper;
pub mod logging;
pub mod paths;

pub use error::{PtyProxyError, Result};
pub use helper::find_helper;
pub use logging::{init_logging_with_config, LogConfig, LogOutput, LOG_ENV};
pub use paths::{config_dir, config_file, log_dir, state_dir};
