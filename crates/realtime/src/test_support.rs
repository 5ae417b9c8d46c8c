//! In-process WebSocket server and helpers for transport tests.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::WebSocketStream;

use crate::client::RealtimeClient;
use crate::types::{ConnectionState, RealtimeConfig, TransportEvent};

const WAIT: Duration = Duration::from_secs(5);

/// Accepts WebSocket connections on an ephemeral local port.
pub(crate) struct TestServer {
    pub(crate) url: String,
    accepted: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
}

impl TestServer {
    pub(crate) async fn start() -> Self {
        Self::with_handshake_delay(Duration::ZERO).await
    }

    /// Holds each accepted TCP connection for `delay` before answering the
    /// WebSocket handshake, keeping clients in `Connecting` meanwhile.
    pub(crate) async fn with_handshake_delay(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::time::sleep(delay).await;
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self { url, accepted }
    }

    /// Waits for the next client connection.
    pub(crate) async fn accept(&mut self) -> WebSocketStream<TcpStream> {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("client connected in time")
            .expect("server running")
    }

    /// True when no new connection arrives within `window`.
    pub(crate) async fn no_more_connections(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.accepted.recv())
            .await
            .is_err()
    }
}

/// URL of a local port with nothing listening.
pub(crate) async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}

/// Config with a long heartbeat so tests only see frames they expect.
pub(crate) fn test_config(url: &str) -> RealtimeConfig {
    let mut config = RealtimeConfig::new(url);
    config.heartbeat_interval = Duration::from_secs(3600);
    config.reconnect.base_interval = Duration::from_millis(10);
    config
}

pub(crate) async fn wait_for_state(client: &RealtimeClient, state: ConnectionState) {
    let mut rx = client.watch_status();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("state reached in time")
        .expect("client alive");
}

/// Receives events up to and including the first one matching `stop`.
pub(crate) async fn collect_until(
    events: &mut broadcast::Receiver<TransportEvent>,
    stop: impl Fn(&TransportEvent) -> bool,
) -> Vec<TransportEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let done = stop(&event);
                    seen.push(event);
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event in time");
    seen
}
