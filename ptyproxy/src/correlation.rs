//! Matching `created` acknowledgements to pending sessions
//!
//! The stock helper protocol carries no correlation field: the helper answers
//! `create` requests in the order it received them, so the oldest pending
//! session gets the next `created`. [`RequestIdCorrelation`] is the opt-in
//! variant for helpers that echo a `request_id` back.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::session::SessionHandle;

/// Decides which pending session a `created` message belongs to
pub trait CorrelationStrategy: Send + Sync + fmt::Debug {
    /// Request id to put on the `create` for the session with this ordinal
    fn tag(&self, seq: u64) -> Option<u64>;

    /// Index into `pending` (oldest first) of the session being acknowledged
    fn select(&self, request_id: Option<u64>, pending: &VecDeque<SessionHandle>) -> Option<usize>;
}

/// First-come first-served matching, compatible with every helper
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedCorrelation;

impl CorrelationStrategy for OrderedCorrelation {
    fn tag(&self, _seq: u64) -> Option<u64> {
        None
    }

    fn select(&self, _request_id: Option<u64>, pending: &VecDeque<SessionHandle>) -> Option<usize> {
        pending.iter().position(|handle| handle.id().is_none() && handle.is_alive())
    }
}

/// Match on the `request_id` the helper echoes in `created`
///
/// Acknowledgements without a `request_id` fall back to ordered matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdCorrelation;

impl CorrelationStrategy for RequestIdCorrelation {
    fn tag(&self, seq: u64) -> Option<u64> {
        Some(seq)
    }

    fn select(&self, request_id: Option<u64>, pending: &VecDeque<SessionHandle>) -> Option<usize> {
        match request_id {
            Some(request_id) => pending
                .iter()
                .position(|handle| handle.seq() == request_id && handle.is_alive()),
            None => OrderedCorrelation.select(None, pending),
        }
    }
}

/// Correlation mode selectable from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correlation {
    #[default]
    Ordered,
    RequestId,
}

impl Correlation {
    pub fn strategy(self) -> Box<dyn CorrelationStrategy> {
        match self {
            Self::Ordered => Box::new(OrderedCorrelation),
            Self::RequestId => Box::new(RequestIdCorrelation),
        }
    }
}
