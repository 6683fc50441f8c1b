//! Gateway wire messages and the bus transport envelope.

use serde::{Deserialize, Serialize};

use crate::realtime::RealtimeEvent;

/// Where an event entered the relay. Attached to bus envelopes so every
/// process can exclude the originating connection from its local fanout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOrigin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

/// The transport wrapper published to the session's bus channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEnvelope {
    pub event: RealtimeEvent,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<EventOrigin>,
    /// Milliseconds since the Unix epoch, stamped at publish time.
    pub timestamp: i64,
}

/// A message received from a client over the gateway socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Event { event: RealtimeEvent },
    PeerReady { peer_id: String },
    Heartbeat,
}

/// A message sent from the gateway to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        client_id: String,
    },
    Event {
        event: RealtimeEvent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<EventOrigin>,
        timestamp: i64,
    },
    PeerAvailable {
        peer_id: String,
        user_id: String,
    },
    PeerRemoved {
        peer_id: String,
    },
    Heartbeat {
        timestamp: i64,
    },
    Error {
        message: String,
    },
}
