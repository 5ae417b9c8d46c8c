//! Reconnection with exponential backoff.
//!
//! Holds the attempt counter, the single pending retry timer, and the
//! logic that arms it after an unexpected close.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Inner;
use crate::types::{ReconnectConfig, TransportEvent};

/// Attempt counter driving the backoff schedule.
///
/// `attempt` grows by one for every failed or aborted connection and is
/// reset only when a socket actually opens.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempt: u32,
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { attempt: 0, config }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    /// Consumes one attempt and returns `(attempt, delay)`, or `None` once
    /// `max_attempts` retries have been handed out.
    pub fn next_delay(&mut self) -> Option<(u32, Duration)> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some((self.attempt, self.config.delay_for_attempt(self.attempt)))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Cancels the pending retry timer, if any.
pub(crate) fn cancel_pending(slot: &mut Option<CancellationToken>) -> bool {
    match slot.take() {
        Some(token) => {
            token.cancel();
            true
        }
        None => false,
    }
}

/// Arms a single retry after an unexpected close.
///
/// No-op after a deliberate `disconnect()`. Once the policy is exhausted
/// the client stays `Disconnected` and a `ReconnectExhausted` event fires.
pub(crate) fn schedule_reconnect(inner: &Arc<Inner>) {
    let mut core = inner.lock_core();
    if core.manual_disconnect {
        debug!(url = %inner.config.url, "reconnect suppressed after disconnect");
        return;
    }

    let Some((attempt, delay)) = core.policy.next_delay() else {
        let attempts = core.policy.attempt();
        warn!(url = %inner.config.url, attempts, "reconnect attempts exhausted");
        let _ = inner
            .events_tx
            .send(TransportEvent::ReconnectExhausted { attempts });
        return;
    };

    cancel_pending(&mut core.reconnect);
    let cancel = CancellationToken::new();
    core.reconnect = Some(cancel.clone());
    let _ = inner
        .events_tx
        .send(TransportEvent::ReconnectScheduled { attempt, delay });
    drop(core);

    info!(
        url = %inner.config.url,
        attempt,
        delay_ms = delay.as_millis() as u64,
        "reconnect scheduled"
    );
    tokio::spawn(reconnect_after(Arc::downgrade(inner), delay, cancel));
}

/// Waits out the backoff delay, then reopens unless cancelled meanwhile.
async fn reconnect_after(inner: Weak<Inner>, delay: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("reconnect cancelled");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };
    {
        let mut core = inner.lock_core();
        // Checked under the lock that `disconnect()` cancels under.
        if cancel.is_cancelled() || core.manual_disconnect {
            return;
        }
        core.reconnect = None;
    }
    Inner::open(&inner);
}
