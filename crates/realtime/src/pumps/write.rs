//! Write pump: the only task that touches the socket's sink half.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Forwards queued frames to the socket until cancelled or the queue closes,
/// then sends a close frame.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = write_rx.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        if let Err(e) = sink.send(frame).await {
            error!("WebSocket write error: {e}");
            return;
        }
    }

    debug!("write pump closing socket");
    let _ = sink.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    fn capture_sink(
        tx: mpsc::Sender<tungstenite::Message>,
    ) -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg).await;
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    #[tokio::test]
    async fn write_pump_forwards_frames_in_order() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(capture_sink(sink_tx), write_rx, cancel));

        write_tx.send(tungstenite::Message::Text("a".to_string().into())).await.unwrap();
        write_tx.send(tungstenite::Message::Text("b".to_string().into())).await.unwrap();
        drop(write_tx);
        handle.await.unwrap();

        assert_eq!(sink_rx.recv().await, Some(tungstenite::Message::Text("a".to_string().into())));
        assert_eq!(sink_rx.recv().await, Some(tungstenite::Message::Text("b".to_string().into())));
        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Close(_))));
    }

    #[tokio::test]
    async fn write_pump_sends_close_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (_write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(write_pump(capture_sink(sink_tx), write_rx, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");

        assert!(matches!(sink_rx.recv().await, Some(tungstenite::Message::Close(_))));
    }
}
