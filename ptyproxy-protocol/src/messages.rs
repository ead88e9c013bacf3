//! Host/helper message types
//!
//! Every message is a JSON object carrying a `type` tag. Messages that refer
//! to a single PTY carry its numeric `id`; `create` and `terminate` do not.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier the helper assigns to a PTY session
pub type PtyId = u32;

/// Terminal rows used when the caller does not ask for a size
pub const DEFAULT_ROWS: u16 = 24;

/// Terminal columns used when the caller does not ask for a size
pub const DEFAULT_COLUMNS: u16 = 80;

/// A single protocol message, in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Ask the helper to start a process on a new PTY (host -> helper)
    Create {
        argv: Vec<String>,
        rows: u16,
        columns: u16,
        #[serde(default)]
        env: HashMap<String, String>,
        /// Only present when the bridge correlates by request id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },

    /// A PTY was created (helper -> host)
    Created {
        id: PtyId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },

    /// Input for the PTY (host -> helper)
    Write { id: PtyId, data: String },

    /// New PTY dimensions (host -> helper)
    Resize { id: PtyId, rows: u16, columns: u16 },

    /// Output produced on the PTY (helper -> host)
    Output { id: PtyId, data: String },

    /// The PTY's process ended (helper -> host)
    Closed { id: PtyId },

    /// Shut down the helper and every PTY it owns (host -> helper)
    Terminate,

    /// Any `type` this side does not understand
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Build a `create` message with no correlation tag
    pub fn create(argv: Vec<String>, rows: u16, columns: u16, env: HashMap<String, String>) -> Self {
        Self::Create {
            argv,
            rows,
            columns,
            env,
            request_id: None,
        }
    }

    /// The PTY this message refers to, if any
    pub fn id(&self) -> Option<PtyId> {
        match self {
            Self::Created { id, .. }
            | Self::Write { id, .. }
            | Self::Resize { id, .. }
            | Self::Output { id, .. }
            | Self::Closed { id } => Some(*id),
            Self::Create { .. } | Self::Terminate | Self::Unknown => None,
        }
    }

    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Created { .. } => "created",
            Self::Write { .. } => "write",
            Self::Resize { .. } => "resize",
            Self::Output { .. } => "output",
            Self::Closed { .. } => "closed",
            Self::Terminate => "terminate",
            Self::Unknown => "unknown",
        }
    }
}

/// A per-session request issued by the host before it knows the PTY id.
///
/// Session handles keep these while their id is unassigned and turn them into
/// wire messages once the helper acknowledges the PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Write { data: String },
    Resize { rows: u16, columns: u16 },
}

impl SessionRequest {
    /// Tag the request with the PTY id
    pub fn into_message(self, id: PtyId) -> Message {
        match self {
            Self::Write { data } => Message::Write { id, data },
            Self::Resize { rows, columns } => Message::Resize { id, rows, columns },
        }
    }
}
