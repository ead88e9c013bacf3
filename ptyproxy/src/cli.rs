//! Command-line argument parsing for the ptyproxy runner

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use ptyproxy::BridgeConfig;
use ptyproxy_utils::LogConfig;

/// ptyproxy - run a command on a PTY owned by a helper process
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to the XDG config location)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Helper executable, overriding `helper.command`
    #[arg(long, env = "PTYPROXY_HELPER")]
    pub helper: Option<String>,

    /// Extra argument for the helper; repeatable, replaces `helper.args`
    #[arg(long = "helper-arg", allow_hyphen_values = true)]
    pub helper_args: Vec<String>,

    /// Terminal rows
    #[arg(long)]
    pub rows: Option<u16>,

    /// Terminal columns
    #[arg(long)]
    pub cols: Option<u16>,

    /// Give up if the helper has not acknowledged the session in this many
    /// milliseconds
    #[arg(long)]
    pub create_timeout: Option<u64>,

    /// How long to wait for the helper to exit before killing it
    #[arg(long, default_value_t = 2000)]
    pub grace_ms: u64,

    /// Log to the state directory instead of stderr
    #[arg(long, default_value_t = false)]
    pub log_file: bool,

    /// Command to run on the PTY (defaults to $SHELL)
    ///
    /// Example: ptyproxy -- python3 -i
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Fold command-line overrides into a loaded configuration
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(helper) = &self.helper {
            config.helper.command = helper.clone();
        }
        if !self.helper_args.is_empty() {
            config.helper.args = self.helper_args.clone();
        }
        if self.create_timeout.is_some() {
            config.session.create_timeout_ms = self.create_timeout;
        }
    }

    pub fn log_config(&self) -> LogConfig {
        if self.log_file {
            LogConfig::embedded()
        } else {
            LogConfig::interactive()
        }
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Executable and arguments to run, falling back to `shell`
    pub fn program(&self, shell: &str) -> (String, Vec<String>) {
        match self.command.split_first() {
            Some((executable, rest)) => (executable.clone(), rest.to_vec()),
            None => (shell.to_string(), Vec::new()),
        }
    }
}
