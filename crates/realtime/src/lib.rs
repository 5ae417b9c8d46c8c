//! Realtime transport client for LiveLink.
//!
//! Keeps one WebSocket alive across network interruptions, multiplexes
//! named channels over it, reconnects with exponential backoff, and sends
//! heartbeats while the socket is open.

pub mod client;
mod pumps;
pub(crate) mod reconnection;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{RealtimeClient, Subscription};
pub use livelink_protocol::Envelope;
pub use reconnection::ReconnectPolicy;
pub use registry::ClientRegistry;
pub use types::{
    ConnectionState, HandlerId, RealtimeConfig, ReconnectConfig, TransportError, TransportEvent,
};
