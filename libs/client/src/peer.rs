//! Peer data channel seams.
//!
//! The relay only provides rendezvous: `peer-available` and `peer-removed`
//! announcements. What a data channel actually is (WebRTC, QUIC, an
//! in-process pipe in tests) belongs to the embedder, behind these traits.
//! The client keeps the mesh bookkeeping — dialing announced peers, fanning
//! published events out to open channels, closing removed ones.

use std::sync::Arc;

use helios_common::RealtimeEvent;

/// Callback invoked with every event received from a peer channel.
pub type PeerEventHandler = Arc<dyn Fn(RealtimeEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("failed to open peer channel: {0}")]
    Connect(String),
}

/// An open direct channel to one peer.
pub trait PeerChannel: Send + Sync {
    /// Best-effort send; failures are the channel's problem, not the
    /// caller's.
    fn send(&self, event: &RealtimeEvent);
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// Dials announced peers. One connector serves one client.
pub trait PeerConnector: Send + Sync {
    fn connect(
        &self,
        peer_id: &str,
        on_event: PeerEventHandler,
    ) -> Result<Box<dyn PeerChannel>, PeerError>;
}
