//! Wire types shared by the LiveLink realtime transport and its consumers.
//!
//! Every frame on the socket is a JSON text message. Inbound messages are
//! routed by their `channel` field (falling back to `type`); the only
//! message the client originates on its own is the heartbeat.

pub mod constants;
pub mod envelope;

pub use envelope::{Envelope, Heartbeat, ProtocolError};
