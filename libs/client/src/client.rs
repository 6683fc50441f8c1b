//! Reconnecting gateway client.
//!
//! One background supervisor task owns the WebSocket for the lifetime of the
//! client and is the only place a reconnect is ever scheduled, so there is
//! never more than one pending attempt. Everything the caller touches goes
//! through the cloneable [`RealtimeClient`] handle.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use helios_common::{ClientMessage, RealtimeEvent, ServerMessage};

use crate::peer::{PeerChannel, PeerConnector};

/// Delay between the end of one connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client was destroyed")]
    Destroyed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected { reason: Option<String> },
    Destroyed,
}

/// Everything needed to reach one session as one user.
#[derive(Clone)]
pub struct ConnectOptions {
    pub gateway_url: String,
    pub session_id: String,
    pub user_id: String,
    pub token: String,
    pub peer_id: Option<String>,
    pub connector: Option<Arc<dyn PeerConnector>>,
    pub reconnect_delay: Duration,
}

impl ConnectOptions {
    pub fn new(
        gateway_url: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            token: token.into(),
            peer_id: None,
            connector: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_peer(mut self, peer_id: impl Into<String>, connector: Arc<dyn PeerConnector>) -> Self {
        self.peer_id = Some(peer_id.into());
        self.connector = Some(connector);
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Identity for connection reuse: same gateway, session, user, and token
    /// means the same logical connection.
    pub fn matches(&self, other: &ConnectOptions) -> bool {
        self.gateway_url == other.gateway_url
            && self.session_id == other.session_id
            && self.user_id == other.user_id
            && self.token == other.token
    }
}

type EventHandler = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;
type StateHandler = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

enum SubscriptionKind {
    Event,
    State,
}

/// Removes its handler when dropped or explicitly unsubscribed.
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
    kind: SubscriptionKind,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            match self.kind {
                SubscriptionKind::Event => {
                    inner.event_handlers.lock().remove(&self.id);
                }
                SubscriptionKind::State => {
                    inner.state_handlers.lock().remove(&self.id);
                }
            }
        }
    }
}

struct Inner {
    options: ConnectOptions,
    state: Mutex<ConnectionState>,
    destroyed: AtomicBool,
    /// Events published while not connected, flushed in order on connect.
    queue: Mutex<VecDeque<RealtimeEvent>>,
    event_handlers: Mutex<HashMap<u64, EventHandler>>,
    state_handlers: Mutex<HashMap<u64, StateHandler>>,
    next_handler_id: AtomicU64,
    /// Latches true on the first successful connect and stays true.
    ready_tx: watch::Sender<bool>,
    /// Present only while a socket is live.
    socket_tx: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    peers: Mutex<HashMap<String, Box<dyn PeerChannel>>>,
    client_id: Mutex<Option<String>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a live client. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Spawns the connection supervisor and returns immediately. Must be
    /// called from within a tokio runtime. Use [`ready`](Self::ready) to wait
    /// for the first successful connect.
    pub fn connect(options: ConnectOptions) -> RealtimeClient {
        let (ready_tx, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            options,
            state: Mutex::new(ConnectionState::Connecting),
            destroyed: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            event_handlers: Mutex::new(HashMap::new()),
            state_handlers: Mutex::new(HashMap::new()),
            next_handler_id: AtomicU64::new(1),
            ready_tx,
            socket_tx: Mutex::new(None),
            peers: Mutex::new(HashMap::new()),
            client_id: Mutex::new(None),
            supervisor: Mutex::new(None),
        });

        let handle = tokio::spawn(run_supervisor(inner.clone()));
        *inner.supervisor.lock() = Some(handle);

        RealtimeClient { inner }
    }

    /// Resolves once the client has connected at least once, or fails if the
    /// client is destroyed first.
    pub async fn ready(&self) -> Result<(), ClientError> {
        let mut rx = self.inner.ready_tx.subscribe();
        loop {
            if *rx.borrow() {
                return Ok(());
            }
            if self.inner.destroyed.load(Ordering::SeqCst) {
                return Err(ClientError::Destroyed);
            }
            if rx.changed().await.is_err() {
                return Err(ClientError::Destroyed);
            }
        }
    }

    /// Sends the event to the gateway and any open peer channels, or queues
    /// it for the next connection. Local subscribers always see it
    /// immediately.
    pub fn publish(&self, event: RealtimeEvent) {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        // The state check happens under the queue lock so a publish racing
        // the reconnect transition either joins the queued backlog or runs
        // strictly after it has been flushed.
        let connected = {
            let mut queue = self.inner.queue.lock();
            let connected = matches!(&*self.inner.state.lock(), ConnectionState::Connected);
            if !connected {
                queue.push_back(event.clone());
            }
            connected
        };
        if connected {
            self.inner.dispatch(&event);
        }
        self.inner.emit_event(&event);
    }

    pub fn subscribe(
        &self,
        handler: impl Fn(&RealtimeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner.event_handlers.lock().insert(id, Arc::new(handler));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
            kind: SubscriptionKind::Event,
        }
    }

    pub fn on_state_change(
        &self,
        handler: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner.state_handlers.lock().insert(id, Arc::new(handler));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
            kind: SubscriptionKind::State,
        }
    }

    /// Tears the client down for good: aborts the supervisor, closes peer
    /// channels, drops queued events. Safe to call more than once.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.supervisor.lock().take() {
            handle.abort();
        }
        *self.inner.socket_tx.lock() = None;
        for (_, channel) in self.inner.peers.lock().drain() {
            channel.close();
        }
        self.inner.queue.lock().clear();
        self.inner.set_state(ConnectionState::Destroyed);
        // Wake any ready() waiters so they observe the destruction.
        self.inner.ready_tx.send_replace(false);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// Connection identifier assigned by the gateway, once connected.
    pub fn client_id(&self) -> Option<String> {
        self.inner.client_id.lock().clone()
    }

    pub fn pending_events(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn open_peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    /// True when both handles point at the same underlying client.
    pub fn same_client(&self, other: &RealtimeClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        {
            let mut current = self.state.lock();
            // Destroyed is terminal; only destroy() itself writes it.
            if matches!(*current, ConnectionState::Destroyed)
                && state != ConnectionState::Destroyed
            {
                return;
            }
            *current = state.clone();
        }
        let handlers: Vec<StateHandler> = self.state_handlers.lock().values().cloned().collect();
        for handler in handlers {
            handler(&state);
        }
    }

    fn emit_event(&self, event: &RealtimeEvent) {
        // Handlers run outside the lock so they may subscribe or publish.
        let handlers: Vec<EventHandler> = self.event_handlers.lock().values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Sends to the gateway socket and every open peer channel. Fire and
    /// forget: a dead socket surfaces through the supervisor, not here.
    fn dispatch(&self, event: &RealtimeEvent) {
        if let Some(tx) = self.socket_tx.lock().as_ref() {
            let _ = tx.send(ClientMessage::Event {
                event: event.clone(),
            });
        }
        for channel in self.peers.lock().values() {
            if channel.is_open() {
                channel.send(event);
            }
        }
    }

    /// Flip into Connected and drain the offline queue as one step. The
    /// queue lock is held across the state write and the flush, so a
    /// concurrent publish can never slip in between the backlog and a fresh
    /// dispatch. State handlers fire only once the backlog is on the wire.
    fn connect_and_flush(&self) {
        let flushed = {
            let mut queue = self.queue.lock();
            {
                let mut state = self.state.lock();
                if matches!(*state, ConnectionState::Destroyed) {
                    return;
                }
                *state = ConnectionState::Connected;
            }
            let pending: Vec<RealtimeEvent> = queue.drain(..).collect();
            for event in &pending {
                self.dispatch(event);
            }
            pending.len()
        };
        if flushed > 0 {
            tracing::debug!(count = flushed, "flushed queued events");
        }

        let handlers: Vec<StateHandler> = self.state_handlers.lock().values().cloned().collect();
        for handler in handlers {
            handler(&ConnectionState::Connected);
        }
    }

    fn handle_gateway_message(
        self: &Arc<Self>,
        text: &str,
        out_tx: &mpsc::UnboundedSender<ClientMessage>,
    ) {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, "dropping unparseable gateway message");
                return;
            }
        };

        match message {
            ServerMessage::Connected { client_id } => {
                *self.client_id.lock() = Some(client_id);
            }
            ServerMessage::Event { event, .. } => {
                self.emit_event(&event);
            }
            ServerMessage::PeerAvailable { peer_id, user_id } => {
                tracing::debug!(%peer_id, %user_id, "peer available");
                self.open_peer_channel(&peer_id);
            }
            ServerMessage::PeerRemoved { peer_id } => {
                if let Some(channel) = self.peers.lock().remove(&peer_id) {
                    channel.close();
                }
            }
            ServerMessage::Heartbeat { .. } => {
                let _ = out_tx.send(ClientMessage::Heartbeat);
            }
            ServerMessage::Error { message } => {
                tracing::warn!(%message, "gateway reported an error");
            }
        }
    }

    fn open_peer_channel(self: &Arc<Self>, peer_id: &str) {
        if self.options.peer_id.as_deref() == Some(peer_id) {
            return;
        }
        if self.peers.lock().contains_key(peer_id) {
            return;
        }
        let Some(connector) = self.options.connector.as_ref() else {
            return;
        };

        // Weak so a channel holding the callback cannot keep the client
        // alive.
        let weak = Arc::downgrade(self);
        let on_event = Arc::new(move |event: RealtimeEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.emit_event(&event);
            }
        });

        match connector.connect(peer_id, on_event) {
            Ok(channel) => {
                self.peers.lock().insert(peer_id.to_string(), channel);
            }
            Err(error) => {
                tracing::warn!(%peer_id, %error, "peer channel failed to open");
            }
        }
    }
}

fn compose_url(options: &ConnectOptions) -> String {
    let separator = if options.gateway_url.contains('?') { '&' } else { '?' };
    let mut url = format!(
        "{}{}sessionId={}&userId={}&token={}",
        options.gateway_url, separator, options.session_id, options.user_id, options.token,
    );
    if let Some(peer_id) = &options.peer_id {
        url.push_str("&peerId=");
        url.push_str(peer_id);
    }
    url
}

/// The single place reconnects happen: one attempt in flight, one delay
/// between attempts, forever until destroy() aborts the task.
async fn run_supervisor(inner: Arc<Inner>) {
    loop {
        if inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        inner.set_state(ConnectionState::Connecting);

        match run_connection(&inner).await {
            Ok(reason) => inner.set_state(ConnectionState::Disconnected { reason }),
            Err(error) => {
                tracing::debug!(%error, "gateway connection attempt failed");
                inner.set_state(ConnectionState::Disconnected {
                    reason: Some(error),
                });
            }
        }

        if inner.destroyed.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(inner.options.reconnect_delay).await;
    }
}

/// Drives one socket from open to close. Returns the close reason, or an
/// error string if the dial itself failed.
async fn run_connection(inner: &Arc<Inner>) -> Result<Option<String>, String> {
    let url = compose_url(&inner.options);
    let (socket, _) = connect_async(&url).await.map_err(|e| e.to_string())?;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
    *inner.socket_tx.lock() = Some(out_tx.clone());

    inner.connect_and_flush();
    inner.ready_tx.send_replace(true);

    if let Some(peer_id) = &inner.options.peer_id {
        let _ = out_tx.send(ClientMessage::PeerReady {
            peer_id: peer_id.clone(),
        });
    }

    let reason = loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(message) = outbound else { break None };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(error) => {
                        tracing::warn!(%error, "failed to encode outbound message");
                        continue;
                    }
                };
                if let Err(error) = ws_tx.send(Message::Text(json.into())).await {
                    break Some(error.to_string());
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        inner.handle_gateway_message(text.as_str(), &out_tx);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => break Some(error.to_string()),
                    None => break None,
                }
            }
        }
    };

    *inner.socket_tx.lock() = None;
    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions::new("ws://localhost:4001/ws", "ses_1", "usr_1", "tok")
    }

    #[test]
    fn matching_is_identity_over_the_full_tuple() {
        let base = options();
        assert!(base.matches(&options()));

        let mut other = options();
        other.token = "different".into();
        assert!(!base.matches(&other));

        let mut other = options();
        other.user_id = "usr_2".into();
        assert!(!base.matches(&other));
    }

    #[test]
    fn peer_id_does_not_affect_matching() {
        struct NeverConnector;
        impl PeerConnector for NeverConnector {
            fn connect(
                &self,
                _peer_id: &str,
                _on_event: crate::peer::PeerEventHandler,
            ) -> Result<Box<dyn PeerChannel>, crate::peer::PeerError> {
                Err(crate::peer::PeerError::Connect("unused".into()))
            }
        }

        let base = options();
        let with_peer = options().with_peer("peer-a", Arc::new(NeverConnector));
        assert!(base.matches(&with_peer));
    }

    #[test]
    fn url_carries_identity_and_optional_peer() {
        let url = compose_url(&options());
        assert_eq!(
            url,
            "ws://localhost:4001/ws?sessionId=ses_1&userId=usr_1&token=tok"
        );

        let mut with_peer = options();
        with_peer.peer_id = Some("peer-a".into());
        assert!(compose_url(&with_peer).ends_with("&peerId=peer-a"));
    }

    #[tokio::test]
    async fn publish_while_disconnected_queues_in_order() {
        let client = RealtimeClient::connect(
            options().with_reconnect_delay(Duration::from_secs(3600)),
        );

        client.publish(RealtimeEvent::RollClear(helios_common::realtime::RollClear {
            session_id: "ses_1".into(),
        }));
        client.publish(RealtimeEvent::Heartbeat(helios_common::realtime::HeartbeatTick {
            ts: 7,
        }));

        assert_eq!(client.pending_events(), 2);
        client.destroy();
    }

    #[tokio::test]
    async fn local_subscribers_see_published_events_immediately() {
        let client = RealtimeClient::connect(
            options().with_reconnect_delay(Duration::from_secs(3600)),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = client.subscribe(move |event| {
            sink.lock().push(event.kind().to_string());
        });

        client.publish(RealtimeEvent::Heartbeat(helios_common::realtime::HeartbeatTick {
            ts: 1,
        }));

        assert_eq!(seen.lock().as_slice(), ["heartbeat"]);
        client.destroy();
    }

    #[tokio::test]
    async fn dropping_a_subscription_removes_the_handler() {
        let client = RealtimeClient::connect(
            options().with_reconnect_delay(Duration::from_secs(3600)),
        );

        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        let sub = client.subscribe(move |_| {
            *sink.lock() += 1;
        });

        client.publish(RealtimeEvent::Heartbeat(helios_common::realtime::HeartbeatTick {
            ts: 1,
        }));
        sub.unsubscribe();
        client.publish(RealtimeEvent::Heartbeat(helios_common::realtime::HeartbeatTick {
            ts: 2,
        }));

        assert_eq!(*seen.lock(), 1);
        client.destroy();
    }

    #[tokio::test]
    async fn destroy_is_terminal_and_idempotent() {
        let client = RealtimeClient::connect(
            options().with_reconnect_delay(Duration::from_secs(3600)),
        );

        client.destroy();
        client.destroy();

        assert_eq!(client.state(), ConnectionState::Destroyed);
        assert!(client.is_destroyed());
        assert!(client.ready().await.is_err());

        // Publishing after destroy is a no-op, not a panic.
        client.publish(RealtimeEvent::Heartbeat(helios_common::realtime::HeartbeatTick {
            ts: 3,
        }));
        assert_eq!(client.pending_events(), 0);
    }
}
