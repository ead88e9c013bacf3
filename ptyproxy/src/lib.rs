//! ptyproxy - drive PTY sessions owned by an out-of-process helper
//!
//! The helper speaks newline-delimited JSON over its stdin/stdout. A
//! [`ProcessBridge`] owns one helper and hands out a [`SessionHandle`] per
//! PTY; handles can be written to before the helper has assigned them an id.

pub mod bridge;
pub mod config;
pub mod correlation;
mod registry;
pub mod session;
mod stats;

pub use bridge::{ProcessBridge, SpawnOptions};
pub use config::{BridgeConfig, ConfigLoader, HelperConfig, ProtocolConfig, SessionConfig};
pub use correlation::{Correlation, CorrelationStrategy, OrderedCorrelation, RequestIdCorrelation};
pub use session::{DataCallback, ExitCallback, HandleState, SessionHandle};
pub use stats::StatsSnapshot;

pub use ptyproxy_protocol::{Message, PtyId};
pub use ptyproxy_utils::{PtyProxyError, Result};
