//! Proactive token refresh.
//!
//! At most one refresh timer is pending per coordinator. Every scheduling
//! decision re-reads [`TokenStorage`]; nothing about the tokens is cached
//! here. Failures are reported through [`SessionEvent`]s only.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth_client::AuthClient;
use crate::error::{RefreshError, SessionError};
use crate::schedule::RefreshSchedule;
use crate::storage::TokenStorage;
use crate::tokens::StoredTokens;
use crate::types::{Clock, SessionConfig, SessionEvent, SystemClock};

const EVENT_CHANNEL_CAPACITY: usize = 32;

struct PendingRefresh {
    id: u64,
    cancel: CancellationToken,
    schedule: RefreshSchedule,
}

#[derive(Default)]
struct RefreshState {
    pending: Option<PendingRefresh>,
    next_timer_id: u64,
    last_attempt: Option<Instant>,
    in_flight: bool,
    /// Bumped by every `clear()`. A refresh that started under an older
    /// value must not arm timers when it completes.
    epoch: u64,
}

struct Inner {
    config: SessionConfig,
    storage: Arc<dyn TokenStorage>,
    auth: AuthClient,
    clock: Arc<dyn Clock>,
    events_tx: broadcast::Sender<SessionEvent>,
    state: Mutex<RefreshState>,
    failures: AtomicU32,
}

/// Clears the in-flight flag when a refresh attempt ends, however it ends.
struct InFlight<'a> {
    inner: &'a Inner,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.lock_state().in_flight = false;
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn load(&self) -> Option<StoredTokens> {
        match self.storage.load() {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("failed to read stored tokens: {e}");
                None
            }
        }
    }

    fn compute_schedule(&self, tokens: &StoredTokens) -> Option<RefreshSchedule> {
        RefreshSchedule::compute(
            tokens,
            self.clock.now_ms(),
            self.config.lead_time,
            self.config.min_delay,
        )
    }

    fn ensure_schedule(self: &Arc<Self>) -> Option<RefreshSchedule> {
        let mut state = self.lock_state();
        if let Some(pending) = &state.pending {
            return Some(pending.schedule);
        }
        self.schedule_locked(&mut state)
    }

    /// Re-arms from fresh storage after a successful refresh, unless
    /// `clear()` ran while it was in flight.
    fn rearm(self: &Arc<Self>, epoch: u64) {
        let mut state = self.lock_state();
        if state.epoch != epoch {
            debug!("refresh cleared while in flight, not rescheduling");
            return;
        }
        cancel_pending(&mut state);
        self.schedule_locked(&mut state);
    }

    fn schedule_locked(self: &Arc<Self>, state: &mut RefreshState) -> Option<RefreshSchedule> {
        let tokens = self.load()?;
        let Some(schedule) = self.compute_schedule(&tokens) else {
            debug!("token expiry unknown, nothing to schedule");
            return None;
        };
        if !self.arm(state, schedule) {
            return None;
        }
        debug!(
            delay_ms = schedule.next_fire_delay_ms,
            expiry_ms = schedule.expiry_ms,
            "token refresh scheduled"
        );
        Some(schedule)
    }

    /// Replaces any pending timer with one firing after `schedule.delay()`.
    fn arm(self: &Arc<Self>, state: &mut RefreshState, schedule: RefreshSchedule) -> bool {
        let Ok(handle) = Handle::try_current() else {
            warn!("no Tokio runtime, refresh not scheduled");
            return false;
        };

        cancel_pending(state);
        state.next_timer_id += 1;
        let id = state.next_timer_id;
        let cancel = CancellationToken::new();
        state.pending = Some(PendingRefresh {
            id,
            cancel: cancel.clone(),
            schedule,
        });
        handle.spawn(fire_after(
            Arc::downgrade(self),
            id,
            schedule.delay(),
            cancel,
        ));
        true
    }

    /// Arms a timer for `delay` unless one is already pending or `clear()`
    /// ran since `epoch` was read.
    fn arm_retry(self: &Arc<Self>, delay: Duration, epoch: u64) {
        let Some(tokens) = self.load() else {
            return;
        };
        let Some(mut schedule) = self.compute_schedule(&tokens) else {
            return;
        };
        let mut state = self.lock_state();
        if state.pending.is_some() || state.epoch != epoch {
            return;
        }
        schedule.next_fire_delay_ms = schedule
            .next_fire_delay_ms
            .max(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        if self.arm(&mut state, schedule) {
            debug!(delay_ms = schedule.next_fire_delay_ms, "token refresh retry scheduled");
        }
    }

    fn clear(&self) -> bool {
        let mut state = self.lock_state();
        state.epoch += 1;
        cancel_pending(&mut state)
    }

    async fn attempt_refresh(self: &Arc<Self>) -> Result<StoredTokens, RefreshError> {
        let (refresh_token, epoch, _in_flight) = {
            let mut state = self.lock_state();
            if state.in_flight {
                return Err(RefreshError::InFlight);
            }
            if let Some(last) = state.last_attempt {
                let elapsed = last.elapsed();
                if elapsed < self.config.throttle_window {
                    return Err(RefreshError::Throttled(self.config.throttle_window - elapsed));
                }
            }

            let epoch = state.epoch;
            let tokens = match self.storage.load() {
                Ok(tokens) => tokens,
                Err(e) => {
                    drop(state);
                    return Err(self.record_failure(e.into(), epoch));
                }
            };
            let Some(refresh_token) = tokens.and_then(|t| t.refresh_token) else {
                return Err(RefreshError::MissingRefreshToken);
            };

            state.in_flight = true;
            state.last_attempt = Some(Instant::now());
            (refresh_token, epoch, InFlight { inner: self })
        };

        self.emit(SessionEvent::Refreshing);
        let result = match self.auth.refresh(&refresh_token).await {
            Ok(response) => self.apply_response(response),
            Err(e) => Err(e),
        };

        match result {
            Ok(tokens) => {
                self.failures.store(0, Ordering::SeqCst);
                let expires_at_ms = tokens.expiry_ms();
                info!(expires_at_ms, "access token refreshed");
                self.emit(SessionEvent::Refreshed { expires_at_ms });
                self.rearm(epoch);
                Ok(tokens)
            }
            Err(RefreshError::SessionCleared) => {
                info!("tokens removed during refresh, discarding response");
                Err(RefreshError::SessionCleared)
            }
            Err(e) => Err(self.record_failure(e, epoch)),
        }
    }

    /// Merges a refresh response into the tokens currently in storage.
    fn apply_response(&self, response: Map<String, Value>) -> Result<StoredTokens, RefreshError> {
        let Some(current) = self.storage.load()? else {
            return Err(RefreshError::SessionCleared);
        };
        let merged = current.merged_with(response, self.clock.now_ms())?;
        self.storage.save(&merged)?;
        Ok(merged)
    }

    /// Counts a failed attempt and trips the breaker at the threshold.
    fn record_failure(self: &Arc<Self>, err: RefreshError, epoch: u64) -> RefreshError {
        if !err.counts_as_failure() {
            return err;
        }

        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(failures, "token refresh failed: {err}");
        self.emit(SessionEvent::RefreshFailed {
            failures,
            reason: err.to_string(),
        });

        if failures >= self.config.failure_threshold {
            self.clear();
            if let Err(e) = self.storage.clear() {
                warn!("failed to delete stored tokens: {e}");
            }
            warn!(failures, "refresh failure threshold reached, tokens cleared");
            self.emit(SessionEvent::TokensCleared);
        } else {
            self.arm_retry(self.config.throttle_window, epoch);
        }
        err
    }
}

fn cancel_pending(state: &mut RefreshState) -> bool {
    match state.pending.take() {
        Some(pending) => {
            pending.cancel.cancel();
            true
        }
        None => false,
    }
}

/// Sleeps until the refresh is due, then attempts it unless cancelled.
async fn fire_after(inner: Weak<Inner>, id: u64, delay: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let epoch = {
        let mut state = inner.lock_state();
        if cancel.is_cancelled() || state.pending.as_ref().map(|p| p.id) != Some(id) {
            return;
        }
        state.pending = None;
        state.epoch
    };

    match inner.attempt_refresh().await {
        Ok(_) => {}
        Err(RefreshError::Throttled(wait)) => {
            debug!(wait_ms = wait.as_millis() as u64, "scheduled refresh throttled");
            inner.arm_retry(wait, epoch);
        }
        Err(e) => debug!("scheduled refresh did not complete: {e}"),
    }
}

/// Keeps the stored access token valid by refreshing it ahead of expiry.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    pub fn new(
        config: SessionConfig,
        storage: Arc<dyn TokenStorage>,
    ) -> Result<Self, RefreshError> {
        Self::with_clock(config, storage, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SessionConfig,
        storage: Arc<dyn TokenStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RefreshError> {
        let auth = AuthClient::new(&config.auth_base_url, config.request_timeout)?;
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                storage,
                auth,
                clock,
                events_tx,
                state: Mutex::new(RefreshState::default()),
                failures: AtomicU32::new(0),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Arms the refresh timer if none is pending.
    ///
    /// Returns the pending schedule, or `None` when there are no tokens, no
    /// derivable expiry, or no Tokio runtime to run the timer on.
    pub fn ensure_schedule(&self) -> Option<RefreshSchedule> {
        self.inner.ensure_schedule()
    }

    /// Exchanges the stored refresh token for new tokens now.
    ///
    /// Rejected without a network call while another attempt is in flight,
    /// within the throttle window of the previous attempt, or when no
    /// refresh token is stored.
    pub async fn attempt_refresh(&self) -> Result<StoredTokens, RefreshError> {
        self.inner.attempt_refresh().await
    }

    /// Cancels the pending refresh timer. Returns whether one was pending.
    pub fn clear(&self) -> bool {
        self.inner.clear()
    }

    /// Cancels the timer and deletes the stored tokens.
    pub fn sign_out(&self) -> Result<(), SessionError> {
        self.clear();
        self.inner.failures.store(0, Ordering::SeqCst);
        self.inner.storage.clear()?;
        info!("signed out");
        Ok(())
    }

    /// Persists tokens obtained outside the coordinator, such as after a
    /// login, and schedules their refresh.
    ///
    /// `obtained_at` is stamped with the current time when absent. Resets
    /// the failure counter, re-enabling refresh after the breaker tripped.
    pub fn store_tokens(
        &self,
        mut tokens: StoredTokens,
    ) -> Result<Option<RefreshSchedule>, SessionError> {
        if tokens.obtained_at.is_none() {
            tokens.obtained_at = Some(self.inner.clock.now_ms());
        }
        self.inner.storage.save(&tokens)?;
        self.inner.failures.store(0, Ordering::SeqCst);
        self.clear();
        Ok(self.ensure_schedule())
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.load().map(|t| t.access_token)
    }

    /// True when tokens are stored and not known to be expired.
    pub fn authenticated(&self) -> bool {
        match self.inner.load() {
            Some(tokens) => tokens
                .expiry_ms()
                .is_none_or(|expiry| expiry > self.inner.clock.now_ms()),
            None => false,
        }
    }

    /// Whole seconds until the access token expires, floored at zero.
    pub fn remaining_secs(&self) -> Option<i64> {
        let expiry = self.inner.load()?.expiry_ms()?;
        Some((expiry - self.inner.clock.now_ms()).max(0) / 1000)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.failures.load(Ordering::SeqCst)
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.inner.lock_state().pending.is_some()
    }

    /// Subscribes to token lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    #[cfg(test)]
    fn timers_armed(&self) -> u64 {
        self.inner.lock_state().next_timer_id
    }
}
