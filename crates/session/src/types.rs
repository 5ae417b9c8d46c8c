//! Session configuration, events and the clock seam.

use std::time::Duration;

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the auth service; refresh posts to `{auth_base_url}/refresh`.
    pub auth_base_url: String,
    /// How long before expiry a refresh fires.
    pub lead_time: Duration,
    /// Lower bound on any scheduled delay.
    pub min_delay: Duration,
    /// Minimum gap between two refresh attempts.
    pub throttle_window: Duration,
    /// Consecutive failures that purge the stored tokens.
    pub failure_threshold: u32,
    pub request_timeout: Duration,
}

impl SessionConfig {
    pub fn new(auth_base_url: impl Into<String>) -> Self {
        Self {
            auth_base_url: auth_base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_base_url: String::new(),
            lead_time: Duration::from_secs(60),
            min_delay: Duration::from_secs(5),
            throttle_window: Duration::from_secs(10),
            failure_threshold: 3,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Token lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh request is about to be sent.
    Refreshing,
    Refreshed { expires_at_ms: Option<i64> },
    RefreshFailed { failures: u32, reason: String },
    /// The circuit breaker purged the stored tokens. Sign-in is required.
    TokensCleared,
}

/// Wall-clock source in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::new("https://auth.example.com");
        assert_eq!(config.auth_base_url, "https://auth.example.com");
        assert_eq!(config.lead_time, Duration::from_secs(60));
        assert_eq!(config.min_delay, Duration::from_secs(5));
        assert_eq!(config.throttle_window, Duration::from_secs(10));
        assert_eq!(config.failure_threshold, 3);
    }

    #[test]
    fn system_clock_is_epoch_millis() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
