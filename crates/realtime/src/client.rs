//! Channel-multiplexed realtime client over a single WebSocket.
//!
//! One [`RealtimeClient`] owns at most one socket. Consumers register
//! handlers per channel; inbound messages are routed by their `channel`
//! field (or `type` when no channel is present). Unexpected closes feed the
//! backoff reconnect in [`crate::reconnection`]; only [`RealtimeClient::disconnect`]
//! stops reconnection for good.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use futures_util::StreamExt;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use livelink_protocol::Envelope;

use crate::pumps::read::{ReadEvents, SocketLoss};
use crate::reconnection::{ReconnectPolicy, cancel_pending, schedule_reconnect};
use crate::types::{
    ConnectionState, HandlerId, MessageHandler, RealtimeConfig, StatusHandler, TransportError,
    TransportEvent,
};

/// Capacity of the outbound frame queue.
const WRITE_QUEUE_CAPACITY: usize = 256;

/// Capacity of the [`TransportEvent`] broadcast.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The live socket and the token that tears down its pumps.
struct Connection {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Stops read and heartbeat pumps; the write pump sends a close frame.
        self.cancel.cancel();
    }
}

/// Mutable connection state, guarded by one lock.
pub(crate) struct Core {
    state: ConnectionState,
    connection: Option<Connection>,
    pub(crate) policy: ReconnectPolicy,
    /// Pending reconnect timer, if any.
    pub(crate) reconnect: Option<CancellationToken>,
    /// Set by `disconnect()`, cleared by `connect()`.
    pub(crate) manual_disconnect: bool,
    /// Bumped on every new attempt and on `disconnect()`. Socket callbacks
    /// carrying an older value are ignored.
    generation: u64,
}

/// Shared state behind every [`RealtimeClient`] handle.
pub(crate) struct Inner {
    pub(crate) config: RealtimeConfig,
    core: Mutex<Core>,
    status_tx: watch::Sender<ConnectionState>,
    pub(crate) events_tx: broadcast::Sender<TransportEvent>,
    status_handlers: Mutex<Vec<(HandlerId, StatusHandler)>>,
    subscriptions: RwLock<HashMap<String, Vec<(HandlerId, MessageHandler)>>>,
    next_handler_id: AtomicU64,
}

impl Inner {
    pub(crate) fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a state change. Call with the core lock held; pass the
    /// result to [`Inner::announce`] after releasing it.
    fn transition(&self, core: &mut Core, next: ConnectionState) -> Option<ConnectionState> {
        if core.state == next {
            return None;
        }
        debug!(url = %self.config.url, from = ?core.state, to = ?next, "connection state changed");
        core.state = next;
        self.status_tx.send_replace(next);
        let _ = self.events_tx.send(TransportEvent::StatusChanged(next));
        Some(next)
    }

    /// Invokes status observers. Must not be called with the core lock held.
    fn announce(&self, changed: Option<ConnectionState>) {
        let Some(state) = changed else {
            return;
        };
        let handlers: Vec<StatusHandler> = self
            .status_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(state))).is_err() {
                warn!(?state, "status handler panicked");
            }
        }
    }

    /// Starts a connection attempt unless one is already connecting or open.
    pub(crate) fn open(self: &Arc<Self>) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(url = %self.config.url, "connect requires a Tokio runtime");
            return false;
        };

        let (generation, changed) = {
            let mut core = self.lock_core();
            if matches!(core.state, ConnectionState::Connecting | ConnectionState::Open) {
                debug!(url = %self.config.url, state = ?core.state, "connect ignored");
                return false;
            }
            core.generation += 1;
            (core.generation, self.transition(&mut core, ConnectionState::Connecting))
        };
        self.announce(changed);

        info!(url = %self.config.url, generation, "connecting");
        runtime.spawn(establish(self.clone(), generation));
        true
    }

    /// Installs a freshly opened socket, or discards it if superseded.
    fn on_open(
        self: &Arc<Self>,
        generation: u64,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) {
        let (sink, read) = stream.split();
        let changed = {
            let mut core = self.lock_core();
            if core.generation != generation || core.manual_disconnect {
                drop(core);
                debug!(url = %self.config.url, generation, "discarding socket from superseded attempt");
                let (_tx, rx) = mpsc::channel(1);
                tokio::spawn(crate::pumps::write::write_pump(
                    sink,
                    rx,
                    CancellationToken::new(),
                ));
                return;
            }

            let cancel = CancellationToken::new();
            let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
            tokio::spawn(crate::pumps::write::write_pump(
                sink,
                write_rx,
                cancel.clone(),
            ));
            tokio::spawn(crate::pumps::read::read_pump(
                read,
                SocketEvents {
                    inner: Arc::downgrade(self),
                    generation,
                },
                write_tx.clone(),
                self.config.idle_timeout,
                cancel.clone(),
            ));
            if !self.config.heartbeat_interval.is_zero() {
                tokio::spawn(crate::pumps::heartbeat::heartbeat_pump(
                    write_tx.clone(),
                    self.config.heartbeat_interval,
                    cancel.clone(),
                ));
            }

            core.connection = Some(Connection { write_tx, cancel });
            core.policy.reset();
            self.transition(&mut core, ConnectionState::Open)
        };
        self.announce(changed);
        info!(url = %self.config.url, generation, "realtime connection open");
    }

    /// Handles an unexpected close or failure of the socket for `generation`.
    fn on_lost(self: &Arc<Self>, generation: u64, loss: SocketLoss) {
        let (errored, closed) = {
            let mut core = self.lock_core();
            if core.generation != generation {
                debug!(url = %self.config.url, generation, "ignoring loss of superseded socket");
                return;
            }
            core.connection = None;
            if core.manual_disconnect {
                return;
            }
            let errored = match loss {
                SocketLoss::Failed => self.transition(&mut core, ConnectionState::Error),
                SocketLoss::Closed => None,
            };
            (errored, self.transition(&mut core, ConnectionState::Disconnected))
        };
        self.announce(errored);
        self.announce(closed);

        warn!(url = %self.config.url, ?loss, "realtime connection lost");
        schedule_reconnect(self);
    }

    /// Decodes and routes one inbound text frame.
    fn on_text(&self, text: &str) {
        match Envelope::decode(text, self.config.max_message_size) {
            Ok(envelope) => self.dispatch(&envelope),
            Err(e) => warn!(url = %self.config.url, "dropping inbound frame: {e}"),
        }
    }

    /// Invokes every handler registered for the message's route, in
    /// registration order. A panicking handler does not stop the others.
    pub(crate) fn dispatch(&self, envelope: &Envelope) {
        let Some(route) = envelope.route() else {
            debug!("message has neither channel nor type, not deliverable");
            return;
        };

        let handlers: Vec<MessageHandler> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(route)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!(channel = route, "no subscribers");
            return;
        }
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
                warn!(channel = route, "message handler panicked");
            }
        }
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed))
    }

    fn remove_handlers(&self, channel: &str, handler: Option<HandlerId>) -> usize {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subs.get_mut(channel) else {
            return 0;
        };
        let before = list.len();
        match handler {
            Some(id) => list.retain(|(h, _)| *h != id),
            None => list.clear(),
        }
        let removed = before - list.len();
        if list.is_empty() {
            subs.remove(channel);
        }
        removed
    }
}

/// Socket connection attempt, run on the runtime.
async fn establish(inner: Arc<Inner>, generation: u64) {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(inner.config.max_message_size);
    ws_config.max_frame_size = Some(inner.config.max_message_size);

    match tokio_tungstenite::connect_async_with_config(
        inner.config.url.as_str(),
        Some(ws_config),
        false,
    )
    .await
    {
        Ok((stream, _response)) => inner.on_open(generation, stream),
        Err(e) => {
            warn!(url = %inner.config.url, error = %e, "connection attempt failed");
            inner.on_lost(generation, SocketLoss::Failed);
        }
    }
}

/// Routes read pump output back to the client that owns the socket.
struct SocketEvents {
    inner: Weak<Inner>,
    generation: u64,
}

impl ReadEvents for SocketEvents {
    fn on_text(&self, text: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_text(text);
        }
    }

    fn on_lost(&self, loss: SocketLoss) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_lost(self.generation, loss);
        }
    }
}

/// Handle returned by [`RealtimeClient::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    inner: Weak<Inner>,
    channel: String,
    id: HandlerId,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Removes this handler. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.remove_handlers(&self.channel, Some(self.id)) > 0,
            None => false,
        }
    }
}

/// Realtime transport client. Cheap to clone; clones share one socket.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    pub fn new(config: RealtimeConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let policy = ReconnectPolicy::new(config.reconnect.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    connection: None,
                    policy,
                    reconnect: None,
                    manual_disconnect: false,
                    generation: 0,
                }),
                status_tx,
                events_tx,
                status_handlers: Mutex::new(Vec::new()),
                subscriptions: RwLock::new(HashMap::new()),
                next_handler_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Opens the socket. No-op while `Connecting` or `Open`.
    ///
    /// Re-enables reconnection after [`disconnect`](Self::disconnect) and
    /// restores the retry budget once it has been exhausted. A pending
    /// reconnect timer is replaced by this attempt. Must be called
    /// from within a Tokio runtime.
    pub fn connect(&self) {
        {
            let mut core = self.inner.lock_core();
            core.manual_disconnect = false;
            cancel_pending(&mut core.reconnect);
            if core.policy.is_exhausted() {
                core.policy.reset();
            }
        }
        Inner::open(&self.inner);
    }

    /// Closes the socket and cancels every timer. Nothing fires afterwards
    /// until [`connect`](Self::connect) is called again.
    pub fn disconnect(&self) {
        let changed = {
            let mut core = self.inner.lock_core();
            core.manual_disconnect = true;
            core.generation += 1;
            cancel_pending(&mut core.reconnect);
            core.connection = None;
            self.inner
                .transition(&mut core, ConnectionState::Disconnected)
        };
        self.inner.announce(changed);
        info!(url = %self.inner.config.url, "realtime client disconnected");
    }

    /// Serializes and queues `message`. Best effort: returns `false` instead
    /// of failing when the socket is not open or the queue is full.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        match self.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %self.inner.config.url, "send dropped: {e}");
                false
            }
        }
    }

    /// Like [`send`](Self::send) but reports why a message was not queued.
    pub fn try_send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(message)?;
        let core = self.inner.lock_core();
        let conn = match (&core.connection, core.state) {
            (Some(conn), ConnectionState::Open) => conn,
            (_, state) => {
                let _ = self
                    .inner
                    .events_tx
                    .send(TransportEvent::SendRejected { state });
                return Err(TransportError::NotOpen(state));
            }
        };
        conn.write_tx
            .try_send(tungstenite::Message::Text(text.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    /// Registers `handler` for `channel`. Legal before connecting; delivery
    /// starts as soon as the socket is open.
    pub fn subscribe<F>(&self, channel: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.inner.next_id();
        self.inner
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(channel = %channel, ?id, "subscribed");

        Subscription {
            inner: Arc::downgrade(&self.inner),
            channel,
            id,
        }
    }

    /// Removes one handler, or every handler of `channel` when `handler` is
    /// `None`. Returns how many were removed.
    pub fn unsubscribe(&self, channel: &str, handler: Option<HandlerId>) -> usize {
        let removed = self.inner.remove_handlers(channel, handler);
        debug!(channel, removed, "unsubscribed");
        removed
    }

    /// Channels with at least one handler.
    pub fn channels(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.inner
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Registers a callback for every connection state transition.
    pub fn on_status_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        self.inner
            .status_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a status callback. Returns `false` if it was not registered.
    pub fn off_status_change(&self, id: HandlerId) -> bool {
        let mut handlers = self
            .inner
            .status_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    pub fn status(&self) -> ConnectionState {
        *self.inner.status_tx.borrow()
    }

    /// Receiver that always holds the latest state.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.inner.status_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Current backoff attempt; zero after a successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.lock_core().policy.attempt()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock_core().reconnect.is_some()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}
