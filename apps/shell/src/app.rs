//! Runs the realtime client and session coordinator until Ctrl-C.

use std::sync::Arc;

use livelink_realtime::{RealtimeClient, Subscription, TransportEvent};
use livelink_session::{FileTokenStore, SessionCoordinator, SessionEvent, TokenStorage};
use tokio::sync::broadcast::error::RecvError;

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let storage: Arc<dyn TokenStorage> = match &config.storage_dir {
        Some(dir) => Arc::new(FileTokenStore::new(dir)),
        None => Arc::new(
            FileTokenStore::in_default_dir()
                .ok_or_else(|| anyhow::anyhow!("cannot determine a token storage directory"))?,
        ),
    };

    let session = SessionCoordinator::new(config.session(), storage)?;
    let mut session_events = session.events();
    match session.ensure_schedule() {
        Some(schedule) => tracing::info!(
            delay_ms = schedule.next_fire_delay_ms,
            "session refresh scheduled"
        ),
        None => tracing::info!("no stored session, refresh idle"),
    }

    let client = RealtimeClient::new(config.realtime());
    let mut transport_events = client.events();
    let subscriptions: Vec<Subscription> = config
        .channels
        .iter()
        .map(|channel| {
            client.subscribe(channel.clone(), |msg| {
                tracing::info!(
                    channel = msg.route().unwrap_or_default(),
                    "{}",
                    msg.value()
                );
            })
        })
        .collect();
    client.connect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            event = transport_events.recv() => match event {
                Ok(event) => log_transport(&event),
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "transport events lagged"),
                Err(RecvError::Closed) => break,
            },
            event = session_events.recv() => match event {
                Ok(event) => log_session(&event),
                Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "session events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    client.disconnect();
    session.clear();
    Ok(())
}

fn log_transport(event: &TransportEvent) {
    match event {
        TransportEvent::StatusChanged(state) => tracing::info!(?state, "connection status"),
        TransportEvent::ReconnectScheduled { attempt, delay } => tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        ),
        TransportEvent::ReconnectExhausted { attempts } => {
            tracing::warn!(attempts, "gave up reconnecting")
        }
        TransportEvent::SendRejected { state } => {
            tracing::debug!(?state, "message dropped, socket not open")
        }
    }
}

fn log_session(event: &SessionEvent) {
    match event {
        SessionEvent::Refreshing => tracing::debug!("refreshing session"),
        SessionEvent::Refreshed { expires_at_ms } => {
            tracing::info!(expires_at_ms, "session refreshed")
        }
        SessionEvent::RefreshFailed { failures, reason } => {
            tracing::warn!(failures, "session refresh failed: {reason}")
        }
        SessionEvent::TokensCleared => {
            tracing::warn!("session expired, sign in again")
        }
    }
}
