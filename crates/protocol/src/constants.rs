use std::time::Duration;

/// Field carrying the logical topic of an inbound message.
pub const CHANNEL_FIELD: &str = "channel";

/// Discriminator field, used for routing when `channel` is absent.
pub const TYPE_FIELD: &str = "type";

/// `type` value of the outbound heartbeat.
pub const HEARTBEAT_TYPE: &str = "ping";

/// Default interval between heartbeats while the socket is open.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default base interval of the reconnect backoff.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(3000);

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Maximum accepted inbound message size in bytes (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
