//! In-memory user presence with multi-session support.
//!
//! Presence is per-**user**, not per-session: a user is online iff they own
//! at least one live session. The registry only tracks state; callers decide
//! what to broadcast from the transitions it reports.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

/// Forward and reverse maps mutate under one lock so they can never disagree.
#[derive(Default)]
struct Inner {
    /// user_id -> live session ids. A user is present iff their set is
    /// non-empty; the last removal deletes the entry.
    sessions_by_user: HashMap<String, HashSet<String>>,
    /// session_id -> owning user_id.
    user_by_session: HashMap<String, String>,
}

/// Thread-safe user → live-sessions registry.
pub struct PresenceRegistry {
    inner: Mutex<Inner>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register a session under a user. Adding an already-present session is
    /// a no-op. Returns `true` if this brought the user online (first live
    /// session), so the caller can broadcast the transition.
    pub fn add_session(&self, user_id: &str, session_id: &str) -> bool {
        let mut inner = self.inner.lock();
        inner
            .user_by_session
            .insert(session_id.to_string(), user_id.to_string());
        let sessions = inner
            .sessions_by_user
            .entry(user_id.to_string())
            .or_default();
        let was_offline = sessions.is_empty();
        sessions.insert(session_id.to_string());
        was_offline
    }

    /// Remove a session from whatever user owns it. Returns the owning user
    /// and whether this was their last session, or `None` if the session was
    /// already removed (double-disconnect safety).
    pub fn remove_session(&self, session_id: &str) -> Option<(String, bool)> {
        let mut inner = self.inner.lock();
        let user_id = inner.user_by_session.remove(session_id)?;
        let emptied = inner
            .sessions_by_user
            .get_mut(&user_id)
            .map(|sessions| {
                sessions.remove(session_id);
                sessions.is_empty()
            })
            .unwrap_or(false);
        if emptied {
            inner.sessions_by_user.remove(&user_id);
        }
        Some((user_id, emptied))
    }

    /// True iff the user has at least one live session.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.lock().sessions_by_user.contains_key(user_id)
    }

    /// The live fan-out target set for the user. Empty when offline. Returns
    /// an owned snapshot; the registry may change immediately afterwards.
    pub fn sessions_for(&self, user_id: &str) -> HashSet<String> {
        self.inner
            .lock()
            .sessions_by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn online_user_ids(&self) -> HashSet<String> {
        self.inner.lock().sessions_by_user.keys().cloned().collect()
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().sessions_by_user.len()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
