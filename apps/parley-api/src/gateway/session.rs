//! Per-connection session state and the live-connection registry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use parley_common::id::prefix;
use parley_common::prefixed_ulid;

use crate::auth::Identity;

use super::events::ServerFrame;

/// State for a single live connection: the authenticated identity plus the
/// handle for sending frames to the physical socket.
///
/// The outbound queue is the per-session ordering guarantee: every frame
/// queued here is drained to the socket by one writer task in FIFO order, so
/// concurrent broadcasts can never interleave out of order at the client.
pub struct ConnectionSession {
    /// Unique session identifier (`ses_`-prefixed ULID).
    pub session_id: String,
    /// Authenticated identity, immutable for the session's lifetime.
    pub identity: Identity,
    outbound: mpsc::UnboundedSender<ServerFrame>,
}

impl ConnectionSession {
    /// Create a session and the receiving half of its outbound queue. The
    /// caller owns the receiver and drains it to the socket.
    pub fn new(identity: Identity) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            session_id: prefixed_ulid(prefix::SESSION),
            identity,
            outbound: tx,
        });
        (session, rx)
    }

    /// Queue a frame for delivery to this connection. A send to a session
    /// whose writer has already shut down is silently dropped: broadcasts
    /// racing a disconnect are best-effort to the last known target set.
    pub fn send(&self, frame: ServerFrame) {
        let _ = self.outbound.send(frame);
    }
}

/// Registry of live connections: session_id → session handle. This is the
/// physical send surface every fan-out resolves its targets against.
pub struct ConnectionRegistry {
    sessions: DashMap<String, Arc<ConnectionSession>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: Arc<ConnectionSession>) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ConnectionSession>> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    /// Snapshot of every live session, for broadcast-to-all events.
    pub fn all(&self) -> Vec<Arc<ConnectionSession>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::EventName;

    fn identity(user_id: &str, username: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            username: username.to_string(),
        }
    }

    #[test]
    fn session_ids_are_unique_and_prefixed() {
        let (a, _rx_a) = ConnectionSession::new(identity("u1", "alice"));
        let (b, _rx_b) = ConnectionSession::new(identity("u1", "alice"));
        assert!(a.session_id.starts_with("ses_"));
        assert_ne!(a.session_id, b.session_id);
    }

    #[tokio::test]
    async fn send_preserves_queue_order() {
        let (session, mut rx) = ConnectionSession::new(identity("u1", "alice"));
        session.send(ServerFrame::event(EventName::WELCOME, serde_json::json!({"n": 1})));
        session.send(ServerFrame::event(EventName::USER_ROOMS, serde_json::json!({"n": 2})));

        assert_eq!(rx.recv().await.unwrap().event, EventName::WELCOME);
        assert_eq!(rx.recv().await.unwrap().event, EventName::USER_ROOMS);
    }

    #[test]
    fn send_after_receiver_dropped_is_silent() {
        let (session, rx) = ConnectionSession::new(identity("u1", "alice"));
        drop(rx);
        // Must not panic.
        session.send(ServerFrame::event(EventName::WELCOME, serde_json::Value::Null));
    }

    #[test]
    fn registry_insert_get_remove() {
        let registry = ConnectionRegistry::new();
        let (session, _rx) = ConnectionSession::new(identity("u1", "alice"));
        let id = session.session_id.clone();

        registry.insert(session);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id).is_some());

        registry.remove(&id);
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }
}
