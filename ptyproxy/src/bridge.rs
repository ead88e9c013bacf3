//! Helper process bridge
//!
//! Spawns the PTY helper, frames its stdout into messages, and multiplexes
//! every [`SessionHandle`] over the one stdin/stdout pair.
//!
//! Two background tasks do the I/O: a writer that owns the helper's stdin and
//! drains the shared outbox in order, and a reader that decodes stdout and
//! routes each message through the session registry. Session callbacks run on
//! the reader task, so they should return quickly.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ptyproxy_protocol::{LineCodec, Message};
use ptyproxy_utils::{find_helper, PtyProxyError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::{BridgeConfig, SessionConfig};
use crate::registry::SessionRegistry;
use crate::session::{Outbox, SessionHandle};
use crate::stats::StatsSnapshot;

/// Per-session options for [`ProcessBridge::spawn`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    /// Falls back to `session.default_rows`
    pub rows: Option<u16>,
    /// Falls back to `session.default_cols`
    pub cols: Option<u16>,
    /// Environment for the process started on the PTY
    pub env: HashMap<String, String>,
}

impl SpawnOptions {
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = Some(cols);
        self.rows = Some(rows);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// Connection to one PTY helper process
pub struct ProcessBridge {
    registry: Arc<SessionRegistry>,
    outbox: Outbox,
    defaults: SessionConfig,
    runtime: tokio::runtime::Handle,
    child: Option<Child>,
    /// Reader and stderr tasks
    tasks: Vec<JoinHandle<()>>,
    /// Tells the writer to flush what is queued and close the helper's input.
    /// Handles keep outbox senders alive, so channel closure cannot do this.
    stop_writer: Option<oneshot::Sender<()>>,
    terminated: AtomicBool,
}

impl ProcessBridge {
    /// Launch the configured helper and connect to its stdio.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &BridgeConfig) -> Result<Self> {
        let helper = find_helper(&config.helper.command)?;
        tracing::info!("Spawning PTY helper from: {:?}", helper);

        let mut child = Command::new(&helper)
            .args(&config.helper.args)
            .envs(&config.helper.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PtyProxyError::spawn(format!("{}: {}", helper.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PtyProxyError::spawn("Failed to capture helper stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PtyProxyError::spawn("Failed to capture helper stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PtyProxyError::spawn("Failed to capture helper stderr"))?;

        let mut bridge = Self::from_streams(stdout, stdin, config);
        bridge.tasks.push(bridge.runtime.spawn(forward_stderr(stderr)));
        bridge.child = Some(child);
        Ok(bridge)
    }

    /// Run the protocol over an existing stream pair instead of a child
    /// process. `reader` carries helper output, `writer` helper input.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn from_streams<R, W>(reader: R, writer: W, config: &BridgeConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, outgoing) = mpsc::unbounded_channel();
        let registry = Arc::new(SessionRegistry::new(
            config.protocol.correlation.strategy(),
            outbox.clone(),
        ));
        let runtime = tokio::runtime::Handle::current();
        let codec = LineCodec::with_max_length(config.protocol.max_line_length);
        tracing::debug!(
            max_line_length = codec.max_length(),
            correlation = ?config.protocol.correlation,
            "Connecting to PTY helper"
        );

        let (stop_writer, stop) = oneshot::channel();
        runtime.spawn(write_loop(
            FramedWrite::new(writer, codec.clone()),
            outgoing,
            stop,
        ));
        let reader_task = runtime.spawn(read_loop(FramedRead::new(reader, codec), registry.clone()));

        Self {
            registry,
            outbox,
            defaults: config.session.clone(),
            runtime,
            child: None,
            tasks: vec![reader_task],
            stop_writer: Some(stop_writer),
            terminated: AtomicBool::new(false),
        }
    }

    /// Ask the helper for a new PTY running `executable` with `args`.
    ///
    /// Returns at once. The handle has no id until the helper acknowledges
    /// the request; writes made before then are queued, not lost.
    pub fn spawn<I, S>(&self, executable: &str, args: I, options: SpawnOptions) -> SessionHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = std::iter::once(executable.to_string())
            .chain(args.into_iter().map(Into::into))
            .collect();
        let rows = options.rows.unwrap_or(self.defaults.default_rows);
        let columns = options.cols.unwrap_or(self.defaults.default_cols);
        let env = options.env;

        tracing::debug!(?argv, rows, columns, "Spawning PTY session");
        let handle = self.registry.register(move |request_id| Message::Create {
            argv,
            rows,
            columns,
            env,
            request_id,
        });

        if let Some(timeout) = self.defaults.create_timeout() {
            let registry = Arc::downgrade(&self.registry);
            let seq = handle.seq();
            self.runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(registry) = registry.upgrade() {
                    registry.expire(seq);
                }
            });
        }

        handle
    }

    /// Tell the helper to shut down. Only the first call sends anything.
    pub fn destroy(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Terminating PTY helper");
        if self.outbox.send(Message::Terminate).is_err() {
            tracing::warn!("Helper writer gone, terminate not sent");
        }
    }

    /// Terminate the helper and wait up to `grace` for it to exit, killing it
    /// after that. All sessions are dead afterwards.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        self.destroy();

        let status = match self.child.as_mut() {
            Some(child) => {
                tokio::select! {
                    status = child.wait() => Some(status?),
                    _ = tokio::time::sleep(grace) => {
                        tracing::warn!("PTY helper did not exit after terminate, killing");
                        child.kill().await?;
                        None
                    }
                }
            }
            None => None,
        };

        if let Some(status) = status {
            tracing::info!("PTY helper exited with status: {:?}", status);
        }
        self.registry.collapse_all();
        Ok(status)
    }

    /// Every session created through this bridge, in creation order
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.registry.sessions()
    }

    pub fn live_count(&self) -> usize {
        self.registry.live_count()
    }

    /// Sessions still waiting for the helper to acknowledge them
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    /// Counters for tolerated protocol faults
    pub fn stats(&self) -> StatsSnapshot {
        self.registry.stats()
    }

    /// OS process id of the helper, while it runs
    pub fn helper_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        self.destroy();
        if let Some(stop) = self.stop_writer.take() {
            let _ = stop.send(());
        }
        for task in &self.tasks {
            task.abort();
        }
        self.registry.collapse_all();
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, LineCodec>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    mut stop: oneshot::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            msg = outgoing.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = &mut stop => {
                // Messages queued before the bridge went away still go out
                while let Ok(msg) = outgoing.try_recv() {
                    if sink.feed(msg).await.is_err() {
                        break;
                    }
                }
                break;
            }
        };

        tracing::trace!(kind = msg.kind(), id = ?msg.id(), "host >>> helper");
        if let Err(e) = sink.send(msg).await {
            tracing::error!("Failed to write to PTY helper: {}", e);
            break;
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("Failed to close helper input: {}", e);
    }
    tracing::debug!("Helper writer stopped");
}

async fn read_loop<R>(mut frames: FramedRead<R, LineCodec>, registry: Arc<SessionRegistry>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match frames.next().await {
            Some(Ok(Ok(msg))) => {
                tracing::trace!(kind = msg.kind(), id = ?msg.id(), "host <<< helper");
                registry.dispatch(msg);
            }
            Some(Ok(Err(e))) => {
                registry.malformed_line();
                tracing::warn!("Skipping line from PTY helper: {}", e);
            }
            Some(Err(e)) => {
                tracing::error!("Error reading from PTY helper: {}", e);
                break;
            }
            None => {
                tracing::info!("PTY helper stdout closed (EOF)");
                break;
            }
        }
    }
    registry.collapse_all();
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::warn!("PTY helper stderr: {}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading helper stderr: {}", e);
                break;
            }
        }
    }
}
