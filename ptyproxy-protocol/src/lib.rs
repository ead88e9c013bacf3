//! ptyproxy-protocol: wire definitions for the PTY helper protocol
//!
//! The host and the helper exchange newline-delimited JSON objects over the
//! helper's stdin/stdout. This crate defines the message set and the codec
//! that frames it.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, Frame, FrameError, LineCodec, MAX_LINE_LENGTH};
pub use messages::{Message, PtyId, SessionRequest, DEFAULT_COLUMNS, DEFAULT_ROWS};
