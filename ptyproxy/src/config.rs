//! Bridge configuration
//!
//! Loaded from `$XDG_CONFIG_HOME/ptyproxy/config.toml`; every field has a
//! default so an absent file is fine.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use ptyproxy_protocol::{DEFAULT_COLUMNS, DEFAULT_ROWS, MAX_LINE_LENGTH};
use ptyproxy_utils::{config_file, PtyProxyError, Result};
use serde::{Deserialize, Serialize};

use crate::correlation::Correlation;

/// Smallest accepted `max_line_length`
const MIN_LINE_LENGTH: usize = 1024;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub helper: HelperConfig,
    pub session: SessionConfig,
    pub protocol: ProtocolConfig,
}

/// How to launch the helper process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Executable name or path
    pub command: String,
    pub args: Vec<String>,
    /// Added to the inherited environment
    pub env: HashMap<String, String>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        let mut env = HashMap::new();
        // Python helpers otherwise die on undecodable terminal output
        env.insert("PYTHONIOENCODING".to_string(), "utf-8:ignore".to_string());

        Self {
            command: "ptyproxy-helper".to_string(),
            args: Vec::new(),
            env,
        }
    }
}

/// Defaults applied to new sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_rows: u16,
    pub default_cols: u16,
    /// Give up on a session whose `created` has not arrived after this long
    pub create_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_rows: DEFAULT_ROWS,
            default_cols: DEFAULT_COLUMNS,
            create_timeout_ms: None,
        }
    }
}

impl SessionConfig {
    pub fn create_timeout(&self) -> Option<Duration> {
        self.create_timeout_ms.map(Duration::from_millis)
    }
}

/// Wire protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub max_line_length: usize,
    pub correlation: Correlation,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_line_length: MAX_LINE_LENGTH,
            correlation: Correlation::Ordered,
        }
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<BridgeConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(BridgeConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<BridgeConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| PtyProxyError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<BridgeConfig> {
        toml::from_str(content).map_err(|e| PtyProxyError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &BridgeConfig) -> Result<()> {
        if config.helper.command.trim().is_empty() {
            return Err(PtyProxyError::config("helper.command must not be empty"));
        }

        if config.session.default_rows == 0 || config.session.default_cols == 0 {
            return Err(PtyProxyError::config(
                "session.default_rows and session.default_cols must be non-zero",
            ));
        }

        if config.session.create_timeout_ms == Some(0) {
            return Err(PtyProxyError::config(
                "session.create_timeout_ms must be positive when set",
            ));
        }

        if config.protocol.max_line_length < MIN_LINE_LENGTH {
            return Err(PtyProxyError::config(format!(
                "protocol.max_line_length must be at least {}",
                MIN_LINE_LENGTH
            )));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<BridgeConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }
}
