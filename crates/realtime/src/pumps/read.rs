//! Read pump: decodes inbound frames and reports how the socket ended.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Roughly a century; stands in for "no idle deadline".
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// How a socket stopped delivering frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketLoss {
    /// Close frame received or stream ended.
    Closed,
    /// Read error or idle deadline exceeded.
    Failed,
}

/// Receiver of read pump output.
pub(crate) trait ReadEvents: Send + Sync + 'static {
    fn on_text(&self, text: &str);
    fn on_lost(&self, loss: SocketLoss);
}

/// Reads frames until the socket ends or the connection is cancelled.
///
/// Cancellation is a deliberate teardown and is not reported. Any other
/// exit calls [`ReadEvents::on_lost`] exactly once.
pub(crate) async fn read_pump<S, E>(
    mut read: S,
    events: E,
    write_tx: mpsc::Sender<tungstenite::Message>,
    idle_timeout: Option<Duration>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    E: ReadEvents,
{
    let idle = idle_timeout.unwrap_or(FAR_FUTURE);
    let deadline = tokio::time::sleep(idle);
    tokio::pin!(deadline);

    let loss = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            () = &mut deadline => {
                warn!(idle_ms = idle.as_millis() as u64, "no traffic within idle timeout, dropping socket");
                break SocketLoss::Failed;
            }

            frame = read.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break SocketLoss::Failed;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break SocketLoss::Closed;
                    }
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + idle);

                match frame {
                    tungstenite::Message::Text(text) => events.on_text(text.as_str()),
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Close(frame) => {
                        debug!(?frame, "received close frame");
                        break SocketLoss::Closed;
                    }
                    tungstenite::Message::Binary(data) => {
                        trace!(len = data.len(), "ignoring binary frame");
                    }
                    tungstenite::Message::Pong(_) | tungstenite::Message::Frame(_) => {}
                }
            }
        }
    };

    events.on_lost(loss);
}
