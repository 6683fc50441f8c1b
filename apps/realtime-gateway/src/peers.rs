//! Peer rendezvous signaling.
//!
//! The relay only announces peer addresses; the data channels themselves are
//! negotiated directly between clients. When a connection declares a peer id,
//! every co-member that has one learns about it and vice versa — an
//! O(members) mesh announcement, not a persistent graph.

use helios_common::ServerMessage;

use crate::registry::SessionRegistry;

/// Announce the peer id held by `conn_id` to the rest of the session, and
/// tell `conn_id` about every co-member that already declared one.
pub fn announce_peer(registry: &SessionRegistry, session_id: &str, conn_id: &str) {
    let members = registry.members_snapshot(session_id);
    let Some(origin) = members.iter().find(|m| m.conn_id == conn_id) else {
        return;
    };
    let Some(origin_peer) = origin.peer_id.clone() else {
        return;
    };

    for member in &members {
        if member.conn_id == conn_id {
            continue;
        }
        let announcement = ServerMessage::PeerAvailable {
            peer_id: origin_peer.clone(),
            user_id: origin.user_id.clone(),
        };
        if member.tx.send(announcement).is_err() {
            tracing::warn!(
                session_id,
                conn_id = %member.conn_id,
                "failed to queue peer announcement"
            );
        }

        if let Some(member_peer) = member.peer_id.clone() {
            let reply = ServerMessage::PeerAvailable {
                peer_id: member_peer,
                user_id: member.user_id.clone(),
            };
            if origin.tx.send(reply).is_err() {
                tracing::warn!(
                    session_id,
                    conn_id,
                    "failed to queue peer announcement for origin"
                );
            }
        }
    }
}

/// Tell the remaining members of a session that a peer went away. The
/// disconnecting connection has already been removed from the registry, so
/// no exclusion is needed.
pub fn announce_peer_removed(registry: &SessionRegistry, session_id: &str, peer_id: String) {
    registry.broadcast_local(session_id, &ServerMessage::PeerRemoved { peer_id }, None);
}
