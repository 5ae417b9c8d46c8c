//! Refresh timing derived from stored tokens.

use std::time::Duration;

use crate::tokens::StoredTokens;

/// When the next proactive refresh should fire.
///
/// Computed fresh on every scheduling decision and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub expiry_ms: i64,
    pub lead_ms: i64,
    pub next_fire_delay_ms: i64,
}

impl RefreshSchedule {
    /// `delay = max(min_delay, expiry - now - lead)`, or `None` when the
    /// tokens carry no derivable expiry.
    pub fn compute(
        tokens: &StoredTokens,
        now_ms: i64,
        lead: Duration,
        min_delay: Duration,
    ) -> Option<Self> {
        let expiry_ms = tokens.expiry_ms()?;
        let lead_ms = duration_ms(lead);
        let until_lead = expiry_ms.saturating_sub(now_ms).saturating_sub(lead_ms);
        Some(Self {
            expiry_ms,
            lead_ms,
            next_fire_delay_ms: until_lead.max(duration_ms(min_delay)),
        })
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.next_fire_delay_ms.max(0) as u64)
    }

    /// Epoch milliseconds at which the refresh fires, relative to `now_ms`.
    pub fn fires_at(&self, now_ms: i64) -> i64 {
        now_ms.saturating_add(self.next_fire_delay_ms)
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
