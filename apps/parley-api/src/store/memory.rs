//! In-memory `Store` implementation (for single-process deployments / tests).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use parley_common::id::prefix;
use parley_common::prefixed_ulid;

use super::{role, Message, Room, RoomMember, Store, StoreError, User};

#[derive(Default)]
struct Tables {
    /// user_id -> User
    users: HashMap<String, User>,
    /// credential -> user_id
    credentials: HashMap<String, String>,
    /// room_id -> Room
    rooms: HashMap<String, Room>,
    /// room name -> room_id
    room_names: HashMap<String, String>,
    /// room_id -> user_id -> membership
    members: HashMap<String, HashMap<String, RoomMember>>,
    /// Append-only, so iteration order is chronological.
    messages: Vec<Message>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, username: &str, credential: &str) -> Result<User, StoreError> {
        let mut t = self.tables.lock();
        if t.users.values().any(|u| u.username == username) {
            return Err(StoreError("username already taken".to_string()));
        }
        if t.credentials.contains_key(credential) {
            return Err(StoreError("credential already registered".to_string()));
        }
        let user = User {
            id: prefixed_ulid(prefix::USER),
            username: username.to_string(),
            created_at: Utc::now(),
        };
        t.credentials
            .insert(credential.to_string(), user.id.clone());
        t.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user_by_credential(&self, credential: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.lock();
        Ok(t.credentials
            .get(credential)
            .and_then(|id| t.users.get(id))
            .cloned())
    }

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().users.get(user_id).cloned())
    }

    async fn create_room(
        &self,
        name: &str,
        display_name: &str,
        owner_id: &str,
        is_public: bool,
    ) -> Result<Room, StoreError> {
        let mut t = self.tables.lock();
        if t.room_names.contains_key(name) {
            return Err(StoreError("room name already taken".to_string()));
        }
        let owner_username = t
            .users
            .get(owner_id)
            .map(|u| u.username.clone())
            .ok_or_else(|| StoreError("owner does not exist".to_string()))?;

        let room = Room {
            id: prefixed_ulid(prefix::ROOM),
            name: name.to_string(),
            display_name: display_name.to_string(),
            owner_id: owner_id.to_string(),
            is_public,
            created_at: Utc::now(),
        };
        t.room_names.insert(name.to_string(), room.id.clone());
        t.rooms.insert(room.id.clone(), room.clone());
        t.members.entry(room.id.clone()).or_default().insert(
            owner_id.to_string(),
            RoomMember {
                room_id: room.id.clone(),
                user_id: owner_id.to_string(),
                username: owner_username,
                role: role::OWNER.to_string(),
                joined_at: room.created_at,
            },
        );
        Ok(room)
    }

    async fn get_public_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let t = self.tables.lock();
        let mut rooms: Vec<Room> = t.rooms.values().filter(|r| r.is_public).cloned().collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    async fn get_room_by_id(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.tables.lock().rooms.get(room_id).cloned())
    }

    async fn get_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError> {
        let t = self.tables.lock();
        Ok(t.room_names.get(name).and_then(|id| t.rooms.get(id)).cloned())
    }

    async fn join_room(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut t = self.tables.lock();
        if !t.rooms.contains_key(room_id) {
            return Err(StoreError("room does not exist".to_string()));
        }
        let username = t
            .users
            .get(user_id)
            .map(|u| u.username.clone())
            .ok_or_else(|| StoreError("user does not exist".to_string()))?;

        let members = t.members.entry(room_id.to_string()).or_default();
        // Upsert: an existing membership (including the owner's) is left as-is.
        members
            .entry(user_id.to_string())
            .or_insert_with(|| RoomMember {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                username,
                role: role::MEMBER.to_string(),
                joined_at: Utc::now(),
            });
        Ok(())
    }

    async fn leave_room(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut t = self.tables.lock();
        if let Some(members) = t.members.get_mut(room_id) {
            members.remove(user_id);
        }
        Ok(())
    }

    async fn get_room_members(&self, room_id: &str) -> Result<Vec<RoomMember>, StoreError> {
        let t = self.tables.lock();
        let mut members: Vec<RoomMember> = t
            .members
            .get(room_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(members)
    }

    async fn is_room_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let t = self.tables.lock();
        Ok(t.members
            .get(room_id)
            .is_some_and(|m| m.contains_key(user_id)))
    }

    async fn get_user_rooms(&self, user_id: &str) -> Result<Vec<Room>, StoreError> {
        let t = self.tables.lock();
        let mut rooms: Vec<Room> = t
            .members
            .iter()
            .filter(|(_, members)| members.contains_key(user_id))
            .filter_map(|(room_id, _)| t.rooms.get(room_id))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    async fn save_message(&self, message: &Message) -> Result<(), StoreError> {
        self.tables.lock().messages.push(message.clone());
        Ok(())
    }

    async fn get_room_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let t = self.tables.lock();
        let matching: Vec<&Message> = t
            .messages
            .iter()
            .filter(|m| m.room_id.as_deref() == Some(room_id))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    async fn get_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let t = self.tables.lock();
        let matching: Vec<&Message> = t
            .messages
            .iter()
            .filter(|m| {
                m.room_id.is_none()
                    && ((m.sender_id == user_a && m.recipient_id.as_deref() == Some(user_b))
                        || (m.sender_id == user_b && m.recipient_id.as_deref() == Some(user_a)))
            })
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn user(store: &MemoryStore, name: &str) -> User {
        store
            .create_user(name, &format!("tok_{name}"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_user_and_find_by_credential() {
        let store = MemoryStore::new();
        let created = user(&store, "alice").await;

        let found = store
            .find_user_by_credential("tok_alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.username, "alice");

        assert!(store
            .find_user_by_credential("tok_bogus")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn create_user_rejects_duplicate_username() {
        let store = MemoryStore::new();
        user(&store, "alice").await;
        assert!(store.create_user("alice", "tok_other").await.is_err());
    }

    #[tokio::test]
    async fn create_room_adds_owner_membership() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let room = store
            .create_room("general", "General", &alice.id, true)
            .await
            .unwrap();

        assert!(store.is_room_member(&room.id, &alice.id).await.unwrap());
        let members = store.get_room_members(&room.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, role::OWNER);
    }

    #[tokio::test]
    async fn create_room_rejects_duplicate_name() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        store
            .create_room("general", "General", &alice.id, true)
            .await
            .unwrap();
        assert!(store
            .create_room("general", "Other", &alice.id, true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn join_room_is_idempotent() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let room = store
            .create_room("general", "General", &alice.id, true)
            .await
            .unwrap();

        store.join_room(&room.id, &bob.id).await.unwrap();
        store.join_room(&room.id, &bob.id).await.unwrap();

        let members = store.get_room_members(&room.id).await.unwrap();
        assert_eq!(members.len(), 2);

        // Re-joining must not demote the owner.
        store.join_room(&room.id, &alice.id).await.unwrap();
        let members = store.get_room_members(&room.id).await.unwrap();
        let owner = members.iter().find(|m| m.user_id == alice.id).unwrap();
        assert_eq!(owner.role, role::OWNER);
    }

    #[tokio::test]
    async fn get_user_rooms_reflects_membership() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let general = store
            .create_room("general", "General", &alice.id, true)
            .await
            .unwrap();
        store
            .create_room("random", "Random", &alice.id, true)
            .await
            .unwrap();
        store.join_room(&general.id, &bob.id).await.unwrap();

        assert_eq!(store.get_user_rooms(&alice.id).await.unwrap().len(), 2);
        let bob_rooms = store.get_user_rooms(&bob.id).await.unwrap();
        assert_eq!(bob_rooms.len(), 1);
        assert_eq!(bob_rooms[0].name, "general");

        store.leave_room(&general.id, &bob.id).await.unwrap();
        assert!(store.get_user_rooms(&bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn room_messages_are_chronological_and_limited() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let room = store
            .create_room("general", "General", &alice.id, true)
            .await
            .unwrap();

        for i in 0..5 {
            store
                .save_message(&Message::room(&room.id, &alice.id, &format!("m{i}")))
                .await
                .unwrap();
        }

        let all = store.get_room_messages(&room.id, 50).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].content, "m0");
        assert_eq!(all[4].content, "m4");

        // Limit keeps the most recent, still oldest-first.
        let last_two = store.get_room_messages(&room.id, 2).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].content, "m3");
        assert_eq!(last_two[1].content, "m4");
    }

    #[tokio::test]
    async fn direct_messages_match_both_directions() {
        let store = MemoryStore::new();
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;
        let carol = user(&store, "carol").await;

        store
            .save_message(&Message::direct(&alice.id, &bob.id, "hi bob"))
            .await
            .unwrap();
        store
            .save_message(&Message::direct(&bob.id, &alice.id, "hi alice"))
            .await
            .unwrap();
        store
            .save_message(&Message::direct(&alice.id, &carol.id, "hi carol"))
            .await
            .unwrap();

        let dms = store
            .get_direct_messages(&alice.id, &bob.id, 50)
            .await
            .unwrap();
        assert_eq!(dms.len(), 2);
        assert_eq!(dms[0].content, "hi bob");
        assert_eq!(dms[1].content, "hi alice");
    }
}
