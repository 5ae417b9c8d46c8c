//! Public types for the realtime transport client.

use std::sync::Arc;
use std::time::Duration;

use livelink_protocol::Envelope;
use livelink_protocol::constants::{
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_BASE,
};

/// Connection state of a transport client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Socket handshake in progress.
    Connecting,
    /// Socket open; heartbeats running.
    Open,
    /// No socket. Either idle, waiting for a reconnect, or given up.
    Disconnected,
    /// The last connection attempt or socket failed.
    Error,
}

/// Events broadcast by a transport client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection state changed.
    StatusChanged(ConnectionState),
    /// A reconnect was armed after an unexpected close or error.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The reconnect budget is spent; only an explicit `connect()` restarts.
    ReconnectExhausted { attempts: u32 },
    /// An outbound message was refused because the socket is not open.
    SendRejected { state: ConnectionState },
}

/// Errors from the transport client.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("socket not open (state: {0:?})")]
    NotOpen(ConnectionState),

    #[error("outbound queue full")]
    QueueFull,

    #[error("connection closed")]
    Closed,
}

/// Identifies a registered message or status handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// Callback invoked for every message routed to a channel.
pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback invoked on every connection state transition.
pub type StatusHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Exponential backoff settings for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry; doubled for every further attempt.
    pub base_interval: Duration,
    /// Number of retries after which the client stays disconnected.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: DEFAULT_RECONNECT_BASE,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectConfig {
    /// Delay for a 1-based attempt number: `base * 2^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_interval.saturating_mul(factor)
    }
}

/// Settings for one transport client.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    pub reconnect: ReconnectConfig,
    /// Interval between `{"type":"ping"}` heartbeats while open. Zero
    /// disables heartbeats.
    pub heartbeat_interval: Duration,
    /// Close the socket when nothing arrives for this long. `None` disables.
    pub idle_timeout: Option<Duration>,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_interval, Duration::from_millis(3000));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let config = ReconnectConfig {
            base_interval: Duration::from_millis(100),
            max_attempts: 10,
        };
        let delays: Vec<u128> = (1..=5)
            .map(|a| config.delay_for_attempt(a).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let config = ReconnectConfig {
            base_interval: Duration::from_secs(1),
            max_attempts: u32::MAX,
        };
        assert!(config.delay_for_attempt(40) >= config.delay_for_attempt(32));
        assert!(config.delay_for_attempt(u32::MAX) > Duration::from_secs(1));
    }

    #[test]
    fn realtime_config_defaults() {
        let config = RealtimeConfig::new("ws://localhost:9000/ws");
        assert_eq!(config.url, "ws://localhost:9000/ws");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.idle_timeout.is_none());
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn transport_error_display() {
        assert_eq!(TransportError::QueueFull.to_string(), "outbound queue full");
        assert_eq!(
            TransportError::NotOpen(ConnectionState::Connecting).to_string(),
            "socket not open (state: Connecting)"
        );
    }
}
