//! Host-side handle for one helper-owned PTY
//!
//! A [`SessionHandle`] exists from the moment the host asks for a PTY, which
//! is before the helper has said which id it gave that PTY. Until then writes
//! and resizes are queued on the handle; when the bridge assigns the id the
//! queue is flushed in order and later requests go straight to the helper.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use ptyproxy_protocol::{Message, PtyId, SessionRequest};
use tokio::sync::mpsc;

/// Callback receiving PTY output
pub type DataCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback run once when the PTY is gone
pub type ExitCallback = Box<dyn FnOnce() + Send>;

/// Outgoing message queue shared by every handle of one bridge
pub(crate) type Outbox = mpsc::UnboundedSender<Message>;

/// Lifecycle of a session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// `create` sent, no `created` seen yet
    Unassigned,
    /// The helper reported this id for the PTY
    Assigned(PtyId),
    /// The PTY closed, never came up, or the bridge went away
    Dead { id: Option<PtyId> },
}

impl HandleState {
    pub fn id(&self) -> Option<PtyId> {
        match *self {
            Self::Unassigned => None,
            Self::Assigned(id) => Some(id),
            Self::Dead { id } => id,
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self, Self::Dead { .. })
    }
}

struct HandleInner {
    state: HandleState,
    /// Requests issued while unassigned, oldest first
    queue: Vec<SessionRequest>,
    on_data: Option<DataCallback>,
    on_exit: Option<ExitCallback>,
    exit_reported: bool,
}

struct Shared {
    /// Creation ordinal within the bridge, also used as the create request id
    seq: u64,
    outbox: Outbox,
    inner: Mutex<HandleInner>,
}

/// Handle to one PTY session driven by the helper
///
/// Cloning is cheap; all clones refer to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub(crate) fn new(seq: u64, outbox: Outbox) -> Self {
        Self {
            shared: Arc::new(Shared {
                seq,
                outbox,
                inner: Mutex::new(HandleInner {
                    state: HandleState::Unassigned,
                    queue: Vec::new(),
                    on_data: None,
                    on_exit: None,
                    exit_reported: false,
                }),
            }),
        }
    }

    /// The helper's id for this PTY, once known
    pub fn id(&self) -> Option<PtyId> {
        self.shared.inner.lock().state.id()
    }

    pub fn state(&self) -> HandleState {
        self.shared.inner.lock().state
    }

    /// False once the session has exited
    pub fn is_alive(&self) -> bool {
        self.shared.inner.lock().state.is_alive()
    }

    /// Number of requests waiting for the id to be assigned
    pub fn queued(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// Send input to the PTY
    pub fn write(&self, data: impl Into<String>) {
        self.submit(SessionRequest::Write { data: data.into() });
    }

    /// Change the PTY dimensions
    pub fn resize(&self, columns: u16, rows: u16) {
        self.submit(SessionRequest::Resize { rows, columns });
    }

    /// Register the output callback, replacing any previous one
    ///
    /// Output that arrives before a callback is registered is dropped.
    pub fn on_data<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.inner.lock().on_data = Some(Arc::new(callback));
    }

    /// Register the exit callback, replacing any previous one
    ///
    /// If the session already exited without anyone being told, the callback
    /// runs immediately.
    pub fn on_exit<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if !inner.state.is_alive() && !inner.exit_reported {
            inner.exit_reported = true;
            drop(inner);
            callback();
            return;
        }
        inner.on_exit = Some(Box::new(callback));
    }

    /// Release host-side resources held by this handle
    ///
    /// Drops both callbacks. The helper is not told anything; the PTY goes
    /// away when it reports `closed` or when the bridge terminates the helper.
    pub fn destroy(&self) {
        let mut inner = self.shared.inner.lock();
        inner.on_data = None;
        inner.on_exit = None;
        inner.exit_reported = true;
    }

    pub(crate) fn seq(&self) -> u64 {
        self.shared.seq
    }

    /// Record the helper's id and flush queued requests in order.
    ///
    /// Returns false if the handle was not waiting for an id.
    pub(crate) fn assign(&self, id: PtyId) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.state != HandleState::Unassigned {
            return false;
        }
        inner.state = HandleState::Assigned(id);

        // Flushed while still holding the lock so a concurrent write cannot
        // overtake queued ones.
        let queued = std::mem::take(&mut inner.queue);
        if !queued.is_empty() {
            tracing::debug!(id, count = queued.len(), "Flushing queued session requests");
        }
        for request in queued {
            self.send(request.into_message(id));
        }
        true
    }

    /// Hand output to the data callback. Returns false if the handle is dead.
    pub(crate) fn deliver(&self, data: &str) -> bool {
        let callback = {
            let inner = self.shared.inner.lock();
            if !inner.state.is_alive() {
                return false;
            }
            inner.on_data.clone()
        };

        match callback {
            Some(callback) => callback(data),
            None => tracing::trace!(bytes = data.len(), "Output before data callback registered"),
        }
        true
    }

    /// Mark the session dead and run the exit callback.
    ///
    /// Returns false if the session was already dead.
    pub(crate) fn exit(&self) -> bool {
        let callback = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_alive() {
                return false;
            }
            let id = inner.state.id();
            inner.state = HandleState::Dead { id };
            if !inner.queue.is_empty() {
                tracing::debug!(
                    count = inner.queue.len(),
                    "Discarding requests queued for a session that never started"
                );
                inner.queue.clear();
            }
            let callback = inner.on_exit.take();
            if callback.is_some() {
                inner.exit_reported = true;
            }
            callback
        };

        if let Some(callback) = callback {
            callback();
        }
        true
    }

    fn submit(&self, request: SessionRequest) {
        let mut inner = self.shared.inner.lock();
        match inner.state {
            HandleState::Unassigned => inner.queue.push(request),
            HandleState::Assigned(id) => self.send(request.into_message(id)),
            HandleState::Dead { id } => {
                tracing::debug!(?id, "Dropping request for exited session");
            }
        }
    }

    fn send(&self, msg: Message) {
        if self.shared.outbox.send(msg).is_err() {
            tracing::debug!("Helper writer gone, dropping message");
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("SessionHandle")
            .field("seq", &self.shared.seq)
            .field("state", &inner.state)
            .field("queued", &inner.queue.len())
            .finish_non_exhaustive()
    }
}
