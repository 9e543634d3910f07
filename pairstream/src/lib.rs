//! PairStream -- length-prefixed framed channel for the PairLink session protocol.
//!
//! Every message on the wire is an 8-byte ASCII decimal length header
//! (left-aligned, space-padded) followed by exactly that many payload bytes.
//! This crate owns the framing codec and the connection lifecycle:
//! - **Listener**: bind, accept (inline or on a cancellable task), close
//! - **Probe**: liveness check whose socket can be reused to connect
//! - **Connection**: serialized `send`, frame-assembling `receive`,
//!   idempotent `close`

pub mod connection;
pub mod error;
pub mod frame;
pub mod listener;

// Re-export key public types at crate root.
pub use connection::{connect, is_listening, probe, ChannelConfig, Connection, Probe, Role};
pub use error::{PairStreamError, Result};
pub use frame::{decode_frame, encode_frame, encode_header, parse_header, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use listener::{AcceptTask, Listener};
