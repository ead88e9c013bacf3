//! Session bookkeeping and routing of helper messages
//!
//! Every handle the bridge ever created stays in `sessions`. Handles waiting
//! for `created` are also in `pending` (oldest first), and assigned handles
//! are indexed by id until the helper reports them closed.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use ptyproxy_protocol::{Message, PtyId};

use crate::correlation::CorrelationStrategy;
use crate::session::{Outbox, SessionHandle};
use crate::stats::{BridgeStats, StatsSnapshot};

#[derive(Default)]
struct RegistryInner {
    sessions: Vec<SessionHandle>,
    pending: VecDeque<SessionHandle>,
    by_id: HashMap<PtyId, SessionHandle>,
    next_seq: u64,
}

pub(crate) struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    strategy: Box<dyn CorrelationStrategy>,
    outbox: Outbox,
    stats: BridgeStats,
}

impl SessionRegistry {
    pub fn new(strategy: Box<dyn CorrelationStrategy>, outbox: Outbox) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_seq: 1,
                ..RegistryInner::default()
            }),
            strategy,
            outbox,
            stats: BridgeStats::default(),
        }
    }

    /// Create a pending session and send its `create` message.
    ///
    /// `build` receives the correlation tag for the request. Registration and
    /// send happen under one lock so pending order always equals send order.
    pub fn register<F>(&self, build: F) -> SessionHandle
    where
        F: FnOnce(Option<u64>) -> Message,
    {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let handle = SessionHandle::new(seq, self.outbox.clone());
        inner.sessions.push(handle.clone());
        inner.pending.push_back(handle.clone());

        let msg = build(self.strategy.tag(seq));
        tracing::debug!(seq, "Requesting new PTY");
        if self.outbox.send(msg).is_err() {
            tracing::warn!(seq, "Helper writer gone, create request not sent");
        }
        handle
    }

    /// Route one message received from the helper
    pub fn dispatch(&self, msg: Message) {
        match msg {
            Message::Created { id, request_id } => self.on_created(id, request_id),
            Message::Output { id, data } => self.on_output(id, &data),
            Message::Closed { id } => self.on_closed(id),
            other => {
                tracing::debug!(kind = other.kind(), "Ignoring unexpected message from helper");
            }
        }
    }

    fn on_created(&self, id: PtyId, request_id: Option<u64>) {
        let mut inner = self.inner.lock();
        let Some(index) = self.strategy.select(request_id, &inner.pending) else {
            drop(inner);
            self.stats.unmatched_created();
            tracing::warn!(id, ?request_id, "Helper created a PTY nobody is waiting for");
            return;
        };
        let Some(handle) = inner.pending.remove(index) else {
            return;
        };

        if let Some(previous) = inner.by_id.insert(id, handle.clone()) {
            tracing::warn!(id, ?previous, "Helper reused the id of a live PTY");
        }
        handle.assign(id);
        tracing::debug!(id, seq = handle.seq(), "PTY created");
    }

    fn on_output(&self, id: PtyId, data: &str) {
        let handle = self.inner.lock().by_id.get(&id).cloned();
        let delivered = handle.map(|h| h.deliver(data)).unwrap_or(false);
        if !delivered {
            self.stats.unmatched_output();
            tracing::debug!(id, bytes = data.len(), "Dropping output for unknown PTY");
        }
    }

    fn on_closed(&self, id: PtyId) {
        let handle = self.inner.lock().by_id.remove(&id);
        let exited = handle.map(|h| h.exit()).unwrap_or(false);
        if exited {
            tracing::debug!(id, "PTY closed");
        } else {
            self.stats.unmatched_closed();
            tracing::debug!(id, "Ignoring close for unknown PTY");
        }
    }

    /// Give up on a session still waiting for `created`.
    ///
    /// Returns true if it was pending; it is then dead and no longer eligible
    /// for matching.
    pub fn expire(&self, seq: u64) -> bool {
        let handle = {
            let mut inner = self.inner.lock();
            let Some(index) = inner.pending.iter().position(|h| h.seq() == seq) else {
                return false;
            };
            inner.pending.remove(index)
        };

        match handle {
            Some(handle) => {
                self.stats.timed_out_create();
                tracing::warn!(seq, "Helper never acknowledged PTY creation");
                handle.exit();
                true
            }
            None => false,
        }
    }

    /// Mark every live session dead, e.g. after the helper went away
    pub fn collapse_all(&self) -> usize {
        let sessions = {
            let mut inner = self.inner.lock();
            inner.pending.clear();
            inner.by_id.clear();
            inner.sessions.clone()
        };

        let collapsed = sessions.iter().filter(|h| h.exit()).count();
        if collapsed > 0 {
            tracing::info!(collapsed, "Closed sessions left open by the helper");
        }
        collapsed
    }

    pub fn malformed_line(&self) {
        self.stats.malformed_line();
    }

    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.inner.lock().sessions.clone()
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().sessions.iter().filter(|h| h.is_alive()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::{OrderedCorrelation, RequestIdCorrelation};
    use crate::session::HandleState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn registry() -> (SessionRegistry, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionRegistry::new(Box::new(OrderedCorrelation), tx), rx)
    }

    fn create(tag: Option<u64>) -> Message {
        Message::Create {
            argv: vec!["sh".into()],
            rows: 24,
            columns: 80,
            env: HashMap::new(),
            request_id: tag,
        }
    }

    fn created(id: PtyId) -> Message {
        Message::Created {
            id,
            request_id: None,
        }
    }

    #[test]
    fn test_register_sends_create() {
        let (registry, mut rx) = registry();
        let handle = registry.register(create);

        assert_eq!(rx.try_recv().unwrap(), create(None));
        assert_eq!(handle.state(), HandleState::Unassigned);
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(registry.sessions().len(), 1);
    }

    #[test]
    fn test_created_resolves_in_fifo_order() {
        let (registry, _rx) = registry();
        let first = registry.register(create);
        let second = registry.register(create);
        let third = registry.register(create);

        registry.dispatch(created(3));
        registry.dispatch(created(9));

        assert_eq!(first.id(), Some(3));
        assert_eq!(second.id(), Some(9));
        assert_eq!(third.id(), None);
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn test_writes_racing_assignment_keep_order() {
        const WRITES: usize = 500;

        for round in 0..50 {
            let (registry, mut rx) = registry();
            let handle = registry.register(create);
            let start = std::sync::Barrier::new(2);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    start.wait();
                    for n in 0..WRITES {
                        handle.write(n.to_string());
                    }
                });
                start.wait();
                registry.dispatch(created(7));
            });

            assert_eq!(rx.try_recv().unwrap(), create(None));
            let written: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
                .map(|msg| match msg {
                    Message::Write { id: 7, data } => data,
                    other => panic!("unexpected message {:?}", other),
                })
                .collect();
            let expected: Vec<String> = (0..WRITES).map(|n| n.to_string()).collect();
            assert_eq!(written, expected, "order broken in round {}", round);
            assert_eq!(handle.queued(), 0);
        }
    }

    #[test]
    fn test_created_without_pending_is_counted() {
        let (registry, _rx) = registry();
        registry.dispatch(created(1));
        assert_eq!(registry.stats().unmatched_created, 1);
    }

    #[test]
    fn test_created_flushes_queue_after_create() {
        let (registry, mut rx) = registry();
        let handle = registry.register(create);
        handle.write("early");

        registry.dispatch(created(7));

        assert_eq!(rx.try_recv().unwrap(), create(None));
        assert_eq!(
            rx.try_recv().unwrap(),
            Message::Write {
                id: 7,
                data: "early".into()
            }
        );
    }

    #[test]
    fn test_output_routed_by_id() {
        let (registry, _rx) = registry();
        let a = registry.register(create);
        let b = registry.register(create);
        registry.dispatch(created(1));
        registry.dispatch(created(2));

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = seen.clone();
        a.on_data(move |d| s.lock().push(format!("a:{}", d)));
        let s = seen.clone();
        b.on_data(move |d| s.lock().push(format!("b:{}", d)));

        registry.dispatch(Message::Output {
            id: 2,
            data: "two".into(),
        });
        registry.dispatch(Message::Output {
            id: 1,
            data: "one".into(),
        });
        registry.dispatch(Message::Output {
            id: 5,
            data: "nobody".into(),
        });

        assert_eq!(*seen.lock(), vec!["b:two".to_string(), "a:one".to_string()]);
        assert_eq!(registry.stats().unmatched_output, 1);
    }

    #[test]
    fn test_closed_is_idempotent() {
        let (registry, _rx) = registry();
        let handle = registry.register(create);
        registry.dispatch(created(4));

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        handle.on_exit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.dispatch(Message::Closed { id: 4 });
        registry.dispatch(Message::Closed { id: 4 });

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), HandleState::Dead { id: Some(4) });
        assert_eq!(registry.stats().unmatched_closed, 1);
        assert_eq!(registry.live_count(), 0);
        // Dead handles are kept
        assert_eq!(registry.sessions().len(), 1);
    }

    #[test]
    fn test_output_after_close_is_dropped() {
        let (registry, _rx) = registry();
        let handle = registry.register(create);
        registry.dispatch(created(4));

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        handle.on_data(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.dispatch(Message::Closed { id: 4 });
        registry.dispatch(Message::Output {
            id: 4,
            data: "late".into(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.stats().unmatched_output, 1);
    }

    #[test]
    fn test_id_reused_after_close() {
        let (registry, _rx) = registry();
        let first = registry.register(create);
        registry.dispatch(created(1));
        registry.dispatch(Message::Closed { id: 1 });

        let second = registry.register(create);
        registry.dispatch(created(1));

        assert!(!first.is_alive());
        assert_eq!(second.state(), HandleState::Assigned(1));
    }

    #[test]
    fn test_unexpected_direction_ignored() {
        let (registry, _rx) = registry();
        let handle = registry.register(create);

        registry.dispatch(Message::Terminate);
        registry.dispatch(Message::Unknown);
        registry.dispatch(Message::Write {
            id: 1,
            data: "x".into(),
        });

        assert_eq!(handle.state(), HandleState::Unassigned);
        assert_eq!(registry.stats(), StatsSnapshot::default());
    }

    #[test]
    fn test_expire_removes_from_matching() {
        let (registry, _rx) = registry();
        let stale = registry.register(create);
        let fresh = registry.register(create);

        assert!(registry.expire(stale.seq()));
        assert!(!registry.expire(stale.seq()));
        assert_eq!(stale.state(), HandleState::Dead { id: None });

        registry.dispatch(created(8));
        assert_eq!(fresh.id(), Some(8));
        assert_eq!(registry.stats().timed_out_creates, 1);
    }

    #[test]
    fn test_expire_after_assignment_is_noop() {
        let (registry, _rx) = registry();
        let handle = registry.register(create);
        registry.dispatch(created(2));

        assert!(!registry.expire(handle.seq()));
        assert!(handle.is_alive());
    }

    #[test]
    fn test_collapse_all() {
        let (registry, _rx) = registry();
        let assigned = registry.register(create);
        let closed = registry.register(create);
        let unacked = registry.register(create);
        registry.dispatch(created(1));
        registry.dispatch(created(2));
        registry.dispatch(Message::Closed { id: 2 });
        assert_eq!(unacked.id(), None);

        let count = Arc::new(AtomicUsize::new(0));
        for handle in [&assigned, &closed, &unacked] {
            let c = count.clone();
            handle.on_exit(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        // `closed` exited before anyone listened, so it reported on registration
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(registry.collapse_all(), 2);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(registry.collapse_all(), 0);
    }

    #[test]
    fn test_request_id_strategy() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = SessionRegistry::new(Box::new(RequestIdCorrelation), tx);
        let first = registry.register(create);
        let second = registry.register(create);

        assert_eq!(rx.try_recv().unwrap(), create(Some(first.seq())));
        assert_eq!(rx.try_recv().unwrap(), create(Some(second.seq())));

        registry.dispatch(Message::Created {
            id: 20,
            request_id: Some(second.seq()),
        });
        registry.dispatch(Message::Created {
            id: 10,
            request_id: Some(first.seq()),
        });

        assert_eq!(first.id(), Some(10));
        assert_eq!(second.id(), Some(20));
    }
}
