//! Reconnecting client for the realtime gateway.
//!
//! [`RealtimeClient`] is the explicit handle: connect, publish, subscribe,
//! destroy. The free functions in this crate root layer a process-wide
//! current client on top of it for embedders that want exactly one live
//! connection at a time.

pub mod client;
pub mod peer;

pub use client::{
    ClientError, ConnectOptions, ConnectionState, RealtimeClient, Subscription,
    DEFAULT_RECONNECT_DELAY,
};
pub use peer::{PeerChannel, PeerConnector, PeerError, PeerEventHandler};

use parking_lot::Mutex;

use helios_common::RealtimeEvent;

static ACTIVE: Mutex<Option<RealtimeClient>> = Mutex::new(None);

/// Connects the process-wide client, reusing the current one when the
/// identity tuple (gateway, session, user, token) matches. A mismatched or
/// destroyed current client is destroyed and replaced. Resolves once the
/// returned client has connected at least once.
pub async fn connect_realtime(options: ConnectOptions) -> Result<RealtimeClient, ClientError> {
    let client = {
        let mut active = ACTIVE.lock();
        match active.as_ref() {
            Some(existing) if existing.options().matches(&options) && !existing.is_destroyed() => {
                existing.clone()
            }
            _ => {
                if let Some(stale) = active.take() {
                    stale.destroy();
                }
                let fresh = RealtimeClient::connect(options);
                *active = Some(fresh.clone());
                fresh
            }
        }
    };
    client.ready().await?;
    Ok(client)
}

/// Destroys the process-wide client, if any. Safe to call when none exists.
pub fn disconnect_realtime() {
    if let Some(client) = ACTIVE.lock().take() {
        client.destroy();
    }
}

/// The process-wide client, if one is connected.
pub fn active_client() -> Option<RealtimeClient> {
    ACTIVE.lock().clone()
}

/// Publishes through the process-wide client; dropped when none exists.
pub fn publish(event: RealtimeEvent) {
    if let Some(client) = active_client() {
        client.publish(event);
    }
}

/// Subscribes on the process-wide client. Returns `None` when no client is
/// connected; the caller decides whether that is an error.
pub fn subscribe(
    handler: impl Fn(&RealtimeEvent) + Send + Sync + 'static,
) -> Option<Subscription> {
    active_client().map(|client| client.subscribe(handler))
}
