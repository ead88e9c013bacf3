//! ptyproxy runner
//!
//! Starts the PTY helper, runs one command on a fresh PTY, forwards stdin
//! lines to it and prints its output until the command exits.

use std::io::Write;

use ptyproxy::{ConfigLoader, ProcessBridge, SpawnOptions};
use ptyproxy_utils::{init_logging_with_config, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

mod cli;

use cli::Args;

/// End-of-transmission, sent to the session when our stdin closes
const EOT: &str = "\u{4}";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    init_logging_with_config(args.log_config())?;
    tracing::info!("ptyproxy starting");
    tracing::debug!("CLI args: {:?}", args);

    match run(args).await {
        Ok(()) => {
            tracing::info!("ptyproxy exiting normally");
            Ok(())
        }
        Err(e) => {
            tracing::error!("ptyproxy error: {}", e);
            eprintln!("Error: {}", e);
            Err(e)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from_path(path)?,
        None => ConfigLoader::load()?,
    };
    args.apply(&mut config);
    ConfigLoader::validate(&config)?;

    let mut bridge = ProcessBridge::start(&config)?;

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".to_string());
    let (executable, rest) = args.program(&shell);
    let options = SpawnOptions {
        rows: args.rows,
        cols: args.cols,
        ..SpawnOptions::default()
    };
    let session = bridge.spawn(&executable, rest, options);

    session.on_data(|data| {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(data.as_bytes()).and_then(|_| stdout.flush()) {
            tracing::debug!("Failed to write session output: {}", e);
        }
    });

    let (exit_tx, mut exited) = oneshot::channel();
    session.on_exit(move || {
        let _ = exit_tx.send(());
    });

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = Vec::new();
    let mut stdin_open = true;
    while stdin_open {
        tokio::select! {
            _ = &mut exited => break,
            read = stdin.read_until(b'\n', &mut line) => {
                if read? == 0 {
                    tracing::debug!("stdin closed, sending EOT");
                    session.write(EOT);
                    stdin_open = false;
                    continue;
                }
                if let Some(text) = input_text(&line) {
                    session.write(text);
                }
                line.clear();
            }
        }
    }

    if !stdin_open && tokio::time::timeout(args.grace(), &mut exited).await.is_err() {
        tracing::warn!("Session still running after stdin closed");
    }

    bridge.shutdown(args.grace()).await?;
    tracing::debug!("Bridge stats: {:?}", bridge.stats());
    Ok(())
}

/// A stdin line as text, or `None` when it is not UTF-8
fn input_text(line: &[u8]) -> Option<&str> {
    match std::str::from_utf8(line) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!("Skipping stdin line that is not UTF-8: {}", e);
            None
        }
    }
}
