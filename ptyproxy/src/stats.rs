//! Counters for protocol faults the bridge tolerates

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct BridgeStats {
    malformed_lines: AtomicU64,
    unmatched_created: AtomicU64,
    unmatched_output: AtomicU64,
    unmatched_closed: AtomicU64,
    timed_out_creates: AtomicU64,
}

/// Point-in-time copy of the bridge counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lines from the helper that did not decode
    pub malformed_lines: u64,
    /// `created` with no session waiting for it
    pub unmatched_created: u64,
    /// `output` for an unknown or exited session
    pub unmatched_output: u64,
    /// `closed` for an unknown or exited session
    pub unmatched_closed: u64,
    /// Sessions that never received `created` in time
    pub timed_out_creates: u64,
}

impl BridgeStats {
    pub fn malformed_line(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unmatched_created(&self) {
        self.unmatched_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unmatched_output(&self) {
        self.unmatched_output.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unmatched_closed(&self) {
        self.unmatched_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timed_out_create(&self) {
        self.timed_out_creates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            unmatched_created: self.unmatched_created.load(Ordering::Relaxed),
            unmatched_output: self.unmatched_output.load(Ordering::Relaxed),
            unmatched_closed: self.unmatched_closed.load(Ordering::Relaxed),
            timed_out_creates: self.timed_out_creates.load(Ordering::Relaxed),
        }
    }
}
