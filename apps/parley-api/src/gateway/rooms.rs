//! Live room subscription index.
//!
//! Tracks which sessions are currently listening to which rooms. This is a
//! derived, rebuildable cache over durable membership: it is reconstructed
//! from the store at connect time and mutated by explicit join/leave actions
//! afterwards. It never authorizes anything; callers verify persisted
//! membership before touching it.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

#[derive(Default)]
struct Inner {
    /// room_id -> subscribed session ids.
    subscribers_by_room: HashMap<String, HashSet<String>>,
    /// session_id -> rooms it is subscribed to. Drives `unsubscribe_all`.
    rooms_by_session: HashMap<String, HashSet<String>>,
}

/// Thread-safe room → live-subscribers index.
pub struct RoomSubscriptionManager {
    inner: Mutex<Inner>,
}

impl RoomSubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Add a session to a room's live subscriber set. Idempotent.
    pub fn subscribe(&self, session_id: &str, room_id: &str) {
        let mut inner = self.inner.lock();
        inner
            .subscribers_by_room
            .entry(room_id.to_string())
            .or_default()
            .insert(session_id.to_string());
        inner
            .rooms_by_session
            .entry(session_id.to_string())
            .or_default()
            .insert(room_id.to_string());
    }

    /// Remove a session from a room's subscriber set. Unsubscribing a
    /// non-subscriber is a no-op.
    pub fn unsubscribe(&self, session_id: &str, room_id: &str) {
        let mut inner = self.inner.lock();
        let room_emptied = inner
            .subscribers_by_room
            .get_mut(room_id)
            .map(|subscribers| {
                subscribers.remove(session_id);
                subscribers.is_empty()
            })
            .unwrap_or(false);
        if room_emptied {
            inner.subscribers_by_room.remove(room_id);
        }
        let session_emptied = inner
            .rooms_by_session
            .get_mut(session_id)
            .map(|rooms| {
                rooms.remove(room_id);
                rooms.is_empty()
            })
            .unwrap_or(false);
        if session_emptied {
            inner.rooms_by_session.remove(session_id);
        }
    }

    /// Remove a session from every room it was in. Must run on disconnect
    /// before the session handle is discarded, or stale fan-out targets leak.
    pub fn unsubscribe_all(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(rooms) = inner.rooms_by_session.remove(session_id) {
            for room_id in rooms {
                let emptied = inner
                    .subscribers_by_room
                    .get_mut(&room_id)
                    .map(|subscribers| {
                        subscribers.remove(session_id);
                        subscribers.is_empty()
                    })
                    .unwrap_or(false);
                if emptied {
                    inner.subscribers_by_room.remove(&room_id);
                }
            }
        }
    }

    /// The exact fan-out target set for a room broadcast. Returns an owned
    /// snapshot copied under the lock so a broadcast never iterates live
    /// state.
    pub fn subscribers_of(&self, room_id: &str) -> HashSet<String> {
        self.inner
            .lock()
            .subscribers_by_room
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for RoomSubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
