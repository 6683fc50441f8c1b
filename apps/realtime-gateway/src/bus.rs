//! Distributed pub/sub bus adapter.
//!
//! One logical channel per session. The adapter reference-counts local
//! members so any number of connections share a single remote subscription,
//! and every publish comes back through the bus — including to the process
//! that published it. That round trip is the only fanout path for
//! client-originated events, so single- and multi-process deployments behave
//! identically.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};

use helios_common::{GatewayEnvelope, ServerMessage};

use crate::registry::SessionRegistry;

/// Capacity of the in-memory hub. Transports that fall behind skip frames.
const HUB_CAPACITY: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus transport is closed")]
    Closed,
}

/// A raw frame as carried on the bus.
#[derive(Debug, Clone)]
pub struct BusFrame {
    pub channel: String,
    pub payload: String,
}

/// The bus channel name for a session.
pub fn channel_name(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// Transport half of the bus: publish anywhere, receive frames for
/// subscribed channels on the receiver handed out at construction.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;
    async fn subscribe(&self, channel: &str) -> Result<(), BusError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError>;
}

/// In-memory bus hub. Every transport created from the same hub observes
/// every publish on its subscribed channels, its own included — the loopback
/// the relay's fanout design depends on. Creating several transports from
/// one hub models several relay processes sharing a broker, which is how the
/// integration tests exercise the multi-process path. A broker-backed
/// transport implements the same trait.
#[derive(Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<BusFrame>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Attach a transport to the hub. Returns the transport plus the inbound
    /// stream of frames for channels it subscribes to.
    pub fn transport(&self) -> (Arc<dyn BusTransport>, mpsc::UnboundedReceiver<BusFrame>) {
        let subscriptions: Arc<RwLock<HashSet<String>>> = Arc::new(RwLock::new(HashSet::new()));
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let mut hub_rx = self.sender.subscribe();
        let subs = subscriptions.clone();
        tokio::spawn(async move {
            loop {
                match hub_rx.recv().await {
                    Ok(frame) => {
                        if !subs.read().contains(&frame.channel) {
                            continue;
                        }
                        if frames_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "bus transport lagged behind the hub");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let transport = MemoryBusTransport {
            publisher: self.sender.clone(),
            subscriptions,
        };
        (Arc::new(transport), frames_rx)
    }
}

struct MemoryBusTransport {
    publisher: broadcast::Sender<BusFrame>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
}

#[async_trait]
impl BusTransport for MemoryBusTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        // send() errors only when no transport holds a receiver; publishing
        // into a channel nobody listens on is not a failure.
        let _ = self.publisher.send(BusFrame {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
        self.subscriptions.write().insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        self.subscriptions.write().remove(channel);
        Ok(())
    }
}

/// Reference-counted session subscriptions over a [`BusTransport`].
pub struct BusAdapter {
    transport: Arc<dyn BusTransport>,
    refcounts: DashMap<String, usize>,
}

impl BusAdapter {
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self {
            transport,
            refcounts: DashMap::new(),
        }
    }

    /// Count a local member in. Opens the remote subscription on 0 -> 1.
    pub async fn subscribe_session(&self, session_id: &str) {
        let was_first = {
            let mut count = self
                .refcounts
                .entry(session_id.to_string())
                .or_insert(0);
            *count += 1;
            *count == 1
        };
        if was_first {
            if let Err(e) = self.transport.subscribe(&channel_name(session_id)).await {
                tracing::error!(?e, session_id, "failed to subscribe session channel");
            }
        }
    }

    /// Count a local member out. Closes the remote subscription on 1 -> 0.
    pub async fn unsubscribe_session(&self, session_id: &str) {
        let was_last = {
            match self.refcounts.get_mut(session_id) {
                None => false,
                Some(mut count) => {
                    if *count <= 1 {
                        true
                    } else {
                        *count -= 1;
                        false
                    }
                }
            }
        };
        if was_last {
            self.refcounts.remove(session_id);
            if let Err(e) = self.transport.unsubscribe(&channel_name(session_id)).await {
                tracing::error!(?e, session_id, "failed to unsubscribe session channel");
            }
        }
    }

    /// Fire-and-forget publish. Transport failures are logged and the event
    /// is lost; at-most-once is the accepted semantics.
    pub async fn publish(&self, session_id: &str, envelope: &GatewayEnvelope) {
        let payload = match serde_json::to_string(envelope) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(?e, session_id, "failed to serialize gateway envelope");
                return;
            }
        };
        if let Err(e) = self.transport.publish(&channel_name(session_id), payload).await {
            tracing::error!(?e, session_id, "failed to publish realtime event");
        }
    }

    /// Whether this process currently holds a remote subscription for the
    /// session.
    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.refcounts
            .get(session_id)
            .map(|count| *count > 0)
            .unwrap_or(false)
    }
}

/// Drain bus frames and fan them out to local session members. Invalid
/// payloads are logged and discarded; the originating connection (when it
/// lives on this process) is excluded from the fanout.
pub async fn run_bus_pump(
    registry: Arc<SessionRegistry>,
    mut frames: mpsc::UnboundedReceiver<BusFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let envelope: GatewayEnvelope = match serde_json::from_str(&frame.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(?e, channel = %frame.channel, "discarding invalid bus payload");
                continue;
            }
        };
        let session_id = envelope.session_id.clone();
        let exclude = envelope
            .origin
            .as_ref()
            .and_then(|origin| origin.client_id.clone());
        let message = ServerMessage::Event {
            event: envelope.event,
            origin: envelope.origin,
            timestamp: envelope.timestamp,
        };
        registry.broadcast_local(&session_id, &message, exclude.as_deref());
    }
}
