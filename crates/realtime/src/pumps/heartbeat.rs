//! Heartbeat pump: periodic `{"type":"ping"}` frames while the socket is open.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use livelink_protocol::Heartbeat;

/// Sends a heartbeat every `period` until the connection is cancelled.
/// A zero `period` sends nothing.
pub(crate) async fn heartbeat_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    if period.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // First tick fires immediately.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let frame = match serde_json::to_string(&Heartbeat::now()) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to encode heartbeat: {e}");
                        continue;
                    }
                };
                trace!("sending heartbeat");
                if write_tx.send(tungstenite::Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_pump_sends_ping_frames() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(heartbeat_pump(tx, Duration::from_secs(30), c));

        let frame = rx.recv().await.expect("heartbeat frame");
        let text = match frame {
            tungstenite::Message::Text(t) => t.as_str().to_owned(),
            other => panic!("expected text frame, got {other:?}"),
        };
        let hb: Heartbeat = serde_json::from_str(&text).unwrap();
        assert_eq!(hb.msg_type, "ping");
        assert!(hb.timestamp > 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_pump_is_silent_before_first_period() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_pump(tx, Duration::from_secs(30), cancel.clone()));

        tokio::time::advance(Duration::from_secs(29)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_period_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        tokio::time::timeout(
            Duration::from_secs(2),
            heartbeat_pump(tx, Duration::ZERO, cancel),
        )
        .await
        .expect("returns immediately");

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn heartbeat_pump_stops_on_cancel() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            heartbeat_pump(tx, Duration::from_millis(10), c).await;
        });

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");

        // Sender dropped with the pump; nothing else arrives.
        while rx.recv().await.is_some() {}
    }
}
