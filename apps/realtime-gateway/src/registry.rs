//! Session membership registry shared by every connection on this process.
//!
//! Uses `DashMap` keyed by session id with a `parking_lot::Mutex` per entry,
//! so concurrent joins and leaves on unrelated sessions never contend. All
//! membership mutation happens under the per-session lock; a broadcast taken
//! after a removal can never target the removed connection.

use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use helios_common::ServerMessage;

/// One live connection's registry entry. The `tx` half feeds the
/// connection's outbound queue, so sending here never blocks on the socket.
#[derive(Debug, Clone)]
pub struct Member {
    pub conn_id: String,
    pub user_id: String,
    pub peer_id: Option<String>,
    pub tx: UnboundedSender<ServerMessage>,
}

/// In-process bookkeeping of which connections belong to which session.
pub struct SessionRegistry {
    sessions: DashMap<String, Mutex<HashMap<String, Member>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Add a member to a session. Returns `true` if it was the first member,
    /// which gates the bus subscription for the session.
    pub fn add_member(&self, session_id: &str, member: Member) -> bool {
        let entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Mutex::new(HashMap::new()));
        let mut members = entry.lock();
        let was_first = members.is_empty();
        members.insert(member.conn_id.clone(), member);
        was_first
    }

    /// Remove a member from a session. Returns whether it was the last local
    /// member (gating the bus unsubscribe) and the removed entry, so the
    /// caller can see the peer id it held.
    pub fn remove_member(&self, session_id: &str, conn_id: &str) -> (bool, Option<Member>) {
        let (was_last, removed) = {
            let Some(entry) = self.sessions.get(session_id) else {
                return (false, None);
            };
            let mut members = entry.lock();
            let removed = members.remove(conn_id);
            (removed.is_some() && members.is_empty(), removed)
        };
        if was_last {
            // Drop the empty session entry unless someone joined in between.
            self.sessions
                .remove_if(session_id, |_, members| members.lock().is_empty());
        }
        (was_last, removed)
    }

    /// Send a message to every live member of a session, best effort.
    /// A member whose outbound queue is gone is logged and skipped; it never
    /// prevents delivery to the others.
    pub fn broadcast_local(
        &self,
        session_id: &str,
        message: &ServerMessage,
        exclude_conn_id: Option<&str>,
    ) {
        let Some(entry) = self.sessions.get(session_id) else {
            return;
        };
        let members = entry.lock();
        for member in members.values() {
            if exclude_conn_id == Some(member.conn_id.as_str()) {
                continue;
            }
            if member.tx.send(message.clone()).is_err() {
                tracing::warn!(
                    session_id,
                    conn_id = %member.conn_id,
                    "failed to queue broadcast for member"
                );
            }
        }
    }

    /// Record the peer id a connection announced.
    pub fn set_peer(&self, session_id: &str, conn_id: &str, peer_id: &str) {
        if let Some(entry) = self.sessions.get(session_id) {
            if let Some(member) = entry.lock().get_mut(conn_id) {
                member.peer_id = Some(peer_id.to_string());
            }
        }
    }

    /// The peer id a connection currently holds, if any.
    pub fn peer_of(&self, session_id: &str, conn_id: &str) -> Option<String> {
        let entry = self.sessions.get(session_id)?;
        let members = entry.lock();
        members.get(conn_id).and_then(|m| m.peer_id.clone())
    }

    /// Snapshot of a session's members for the signaling relay.
    pub fn members_snapshot(&self, session_id: &str) -> Vec<Member> {
        match self.sessions.get(session_id) {
            Some(entry) => entry.lock().values().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Number of live members in a session.
    pub fn member_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map(|entry| entry.lock().len())
            .unwrap_or(0)
    }

    /// Number of sessions with at least one local member.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helios_common::realtime::{ChatMessage, RealtimeEvent};
    use tokio::sync::mpsc;

    fn member(conn_id: &str, user_id: &str) -> (Member, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Member {
                conn_id: conn_id.to_string(),
                user_id: user_id.to_string(),
                peer_id: None,
                tx,
            },
            rx,
        )
    }

    fn chat_event() -> ServerMessage {
        ServerMessage::Event {
            event: RealtimeEvent::ChatMessage(ChatMessage {
                message_id: "msg_1".to_string(),
                content: "hi".to_string(),
            }),
            origin: None,
            timestamp: 1,
        }
    }

    #[test]
    fn add_member_reports_first_and_remove_reports_last() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = member("conn_a", "usr_1");
        let (b, _rx_b) = member("conn_b", "usr_2");

        assert!(registry.add_member("ses_1", a));
        assert!(!registry.add_member("ses_1", b));
        assert_eq!(registry.member_count("ses_1"), 2);

        let (was_last, removed) = registry.remove_member("ses_1", "conn_a");
        assert!(!was_last);
        assert_eq!(removed.unwrap().conn_id, "conn_a");

        let (was_last, _) = registry.remove_member("ses_1", "conn_b");
        assert!(was_last);
        assert_eq!(registry.member_count("ses_1"), 0);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn remove_unknown_member_is_a_noop() {
        let registry = SessionRegistry::new();
        let (a, _rx) = member("conn_a", "usr_1");
        registry.add_member("ses_1", a);

        let (was_last, removed) = registry.remove_member("ses_1", "conn_zzz");
        assert!(!was_last);
        assert!(removed.is_none());
        assert_eq!(registry.member_count("ses_1"), 1);

        let (was_last, removed) = registry.remove_member("ses_other", "conn_a");
        assert!(!was_last);
        assert!(removed.is_none());
    }

    #[test]
    fn broadcast_excludes_origin_connection() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = member("conn_a", "usr_1");
        let (b, mut rx_b) = member("conn_b", "usr_2");
        registry.add_member("ses_1", a);
        registry.add_member("ses_1", b);

        registry.broadcast_local("ses_1", &chat_event(), Some("conn_a"));

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn broadcast_survives_dead_member_queue() {
        let registry = SessionRegistry::new();
        let (a, rx_a) = member("conn_a", "usr_1");
        let (b, mut rx_b) = member("conn_b", "usr_2");
        let (c, mut rx_c) = member("conn_c", "usr_3");
        registry.add_member("ses_1", a);
        registry.add_member("ses_1", b);
        registry.add_member("ses_1", c);

        // conn_a's receiver is gone, as if its socket task died.
        drop(rx_a);

        registry.broadcast_local("ses_1", &chat_event(), None);

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn broadcast_to_unknown_session_is_a_noop() {
        let registry = SessionRegistry::new();
        registry.broadcast_local("ses_missing", &chat_event(), None);
    }

    #[test]
    fn set_peer_records_and_peer_of_reads() {
        let registry = SessionRegistry::new();
        let (a, _rx) = member("conn_a", "usr_1");
        registry.add_member("ses_1", a);

        assert!(registry.peer_of("ses_1", "conn_a").is_none());
        registry.set_peer("ses_1", "conn_a", "p1");
        assert_eq!(registry.peer_of("ses_1", "conn_a").as_deref(), Some("p1"));

        let snapshot = registry.members_snapshot("ses_1");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].peer_id.as_deref(), Some("p1"));
    }

    #[test]
    fn sessions_are_independent() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = member("conn_a", "usr_1");
        let (b, mut rx_b) = member("conn_b", "usr_2");
        registry.add_member("ses_1", a);
        registry.add_member("ses_2", b);

        registry.broadcast_local("ses_1", &chat_event(), None);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }
}
