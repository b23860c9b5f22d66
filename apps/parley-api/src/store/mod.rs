//! Persistence capability boundary.
//!
//! The gateway treats persistence as an opaque capability: everything durable
//! (users, rooms, memberships, messages) lives behind the [`Store`] trait.
//! The in-memory registries in `gateway/` are derived, rebuildable indexes
//! over this durable state.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use memory::MemoryStore;

/// A registered user.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A chat room. `name` is the unique lowercase handle; `display_name` is
/// free-form.
#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub owner_id: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

/// Durable record that a user belongs to a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomMember {
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

/// Member roles.
pub mod role {
    pub const OWNER: &str = "owner";
    pub const MEMBER: &str = "member";
}

/// A persisted message. Exactly one of `room_id` / `recipient_id` is set:
/// room message XOR direct message. The dispatcher's constructors are the
/// only way it builds one, so the invariant holds before `save_message` is
/// ever called.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub room_id: Option<String>,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a room-scoped message.
    pub fn room(room_id: &str, sender_id: &str, content: &str) -> Self {
        Self {
            id: parley_common::prefixed_ulid(parley_common::id::prefix::MESSAGE),
            room_id: Some(room_id.to_string()),
            sender_id: sender_id.to_string(),
            recipient_id: None,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Build a direct message.
    pub fn direct(sender_id: &str, recipient_id: &str, content: &str) -> Self {
        Self {
            id: parley_common::prefixed_ulid(parley_common::id::prefix::MESSAGE),
            room_id: None,
            sender_id: sender_id.to_string(),
            recipient_id: Some(recipient_id.to_string()),
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Generic persistence failure. Callers map this to an internal-error ack;
/// the original cause is logged where it occurs.
#[derive(Debug)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Abstraction over durable storage for users, rooms, memberships, and
/// messages.
///
/// Backed by a relational database in production and [`MemoryStore`] in
/// tests.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a user reachable via the given opaque credential.
    async fn create_user(&self, username: &str, credential: &str) -> Result<User, StoreError>;

    async fn find_user_by_credential(&self, credential: &str) -> Result<Option<User>, StoreError>;

    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Create a room and its owner membership in one step.
    async fn create_room(
        &self,
        name: &str,
        display_name: &str,
        owner_id: &str,
        is_public: bool,
    ) -> Result<Room, StoreError>;

    async fn get_public_rooms(&self) -> Result<Vec<Room>, StoreError>;

    async fn get_room_by_id(&self, room_id: &str) -> Result<Option<Room>, StoreError>;

    async fn get_room_by_name(&self, name: &str) -> Result<Option<Room>, StoreError>;

    /// Idempotent membership upsert: joining a room you already belong to is
    /// a no-op.
    async fn join_room(&self, room_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn leave_room(&self, room_id: &str, user_id: &str) -> Result<(), StoreError>;

    async fn get_room_members(&self, room_id: &str) -> Result<Vec<RoomMember>, StoreError>;

    async fn is_room_member(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError>;

    /// All rooms the user belongs to. Used to rebuild the live subscription
    /// index at connect time.
    async fn get_user_rooms(&self, user_id: &str) -> Result<Vec<Room>, StoreError>;

    async fn save_message(&self, message: &Message) -> Result<(), StoreError>;

    /// The last `limit` messages in a room, oldest first.
    async fn get_room_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// The last `limit` direct messages between two users, oldest first.
    async fn get_direct_messages(
        &self,
        user_a: &str,
        user_b: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
}
