//! Session lifecycle orchestration, inbound event dispatch, and fan-out.
//!
//! The dispatcher is the only component that talks to everything: it
//! validates inbound events, consults durable state through the store,
//! mutates the in-memory registries, and resolves fan-out target sets
//! against the connection registry.
//!
//! Locking discipline (binding): registry locks are only ever held for the
//! in-memory mutation itself, never across a store call, and every fan-out
//! copies its target set out of the registry before sending. A broadcast
//! racing a disconnect is best-effort to the last known target set; sends to
//! a closed session's queue are dropped.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::auth::Identity;
use crate::error::DispatchError;
use crate::store::{Message, Store};

use super::events::{
    ClientFrame, CreateRoomPayload, DirectMessagePayload, EventName, GetDirectMessagesPayload,
    GetRoomMembersPayload, JoinRoomPayload, LeaveRoomPayload, RoomMessagePayload, ServerFrame,
    TypingPayload,
};
use super::presence::PresenceRegistry;
use super::rooms::RoomSubscriptionManager;
use super::session::{ConnectionRegistry, ConnectionSession};

/// Room name handle bounds (`^[a-z0-9-]+$`).
const ROOM_NAME_MIN_LEN: usize = 3;
const ROOM_NAME_MAX_LEN: usize = 100;

/// Hard ceiling on client-requested history sizes.
const MAX_HISTORY_LIMIT: usize = 200;

pub struct Dispatcher {
    store: Arc<dyn Store>,
    presence: PresenceRegistry,
    subscriptions: RoomSubscriptionManager,
    connections: ConnectionRegistry,
    history_limit: usize,
    max_message_len: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, history_limit: usize, max_message_len: usize) -> Self {
        Self {
            store,
            presence: PresenceRegistry::new(),
            subscriptions: RoomSubscriptionManager::new(),
            connections: ConnectionRegistry::new(),
            history_limit,
            max_message_len,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn subscriptions(&self) -> &RoomSubscriptionManager {
        &self.subscriptions
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Bring an authenticated session into the Active state.
    ///
    /// Registers the session, rebuilds its room subscriptions from durable
    /// membership, greets it, and announces it. The caller must not process
    /// any inbound event for this session until this returns, so a client
    /// can never act before its own identity is registered.
    pub async fn connect(&self, session: &Arc<ConnectionSession>) -> Result<(), DispatchError> {
        // Durable reads happen first: a store failure here rejects the
        // connection before any registry state exists.
        let user_rooms = self.store.get_user_rooms(&session.identity.user_id).await?;

        self.connections.insert(session.clone());
        let came_online = self
            .presence
            .add_session(&session.identity.user_id, &session.session_id);
        for room in &user_rooms {
            self.subscriptions.subscribe(&session.session_id, &room.id);
        }

        session.send(ServerFrame::event(
            EventName::WELCOME,
            json!({ "session_id": session.session_id, "user": user_json(&session.identity) }),
        ));
        session.send(ServerFrame::event(
            EventName::USER_ROOMS,
            json!({ "rooms": user_rooms }),
        ));

        if came_online {
            self.broadcast_except(
                &session.session_id,
                ServerFrame::event(
                    EventName::USER_JOINED,
                    json!({ "user": user_json(&session.identity) }),
                ),
            );
        }
        self.broadcast_all(ServerFrame::event(
            EventName::ONLINE_USERS,
            self.online_snapshot(),
        ));

        Ok(())
    }

    /// Tear a session down. In-memory cleanup is unconditional; the presence
    /// broadcasts afterwards are best-effort. Once this returns, no new
    /// fan-out can target the session.
    pub fn disconnect(&self, session: &ConnectionSession) {
        self.subscriptions.unsubscribe_all(&session.session_id);
        let removed = self.presence.remove_session(&session.session_id);
        self.connections.remove(&session.session_id);

        if let Some((_, true)) = removed {
            self.broadcast_all(ServerFrame::event(
                EventName::USER_LEFT,
                json!({ "user": user_json(&session.identity) }),
            ));
            self.broadcast_all(ServerFrame::event(
                EventName::ONLINE_USERS,
                self.online_snapshot(),
            ));
        }
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    /// Handle one inbound frame. Operation failures never escape: they are
    /// serialized into the caller's ack (or logged when no ack was
    /// requested) and the session stays open.
    pub async fn handle_frame(&self, session: &Arc<ConnectionSession>, frame: ClientFrame) {
        let ClientFrame { event, ack, data } = frame;
        let result = self.dispatch(session, &event, data).await;
        match (ack, result) {
            (Some(id), Ok(data)) => session.send(ServerFrame::ack_ok(id, data)),
            (Some(id), Err(err)) => {
                tracing::debug!(session_id = %session.session_id, %event, %err, "operation rejected");
                session.send(ServerFrame::ack_err(id, &err));
            }
            (None, Ok(_)) => {}
            (None, Err(err)) => {
                tracing::debug!(session_id = %session.session_id, %event, %err, "operation rejected (no ack requested)");
            }
        }
    }

    async fn dispatch(
        &self,
        session: &Arc<ConnectionSession>,
        event: &str,
        data: Value,
    ) -> Result<Value, DispatchError> {
        match event {
            "create-room" => self.create_room(session, parse(data)?).await,
            "join-room" => self.join_room(session, parse(data)?).await,
            "leave-room" => self.leave_room(session, parse(data)?).await,
            "room-message" => self.room_message(session, parse(data)?).await,
            "direct-message" => self.direct_message(session, parse(data)?).await,
            "typing-room" => self.typing(session, parse(data)?, EventName::TYPING_ROOM),
            "stop-typing-room" => self.typing(session, parse(data)?, EventName::STOP_TYPING_ROOM),
            "get-public-rooms" => self.get_public_rooms().await,
            "get-room-members" => self.get_room_members(session, parse(data)?).await,
            "get-direct-messages" => self.get_direct_messages(session, parse(data)?).await,
            _ => Err(DispatchError::validation(format!("Unknown event: {event}"))),
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    async fn create_room(
        &self,
        session: &Arc<ConnectionSession>,
        payload: CreateRoomPayload,
    ) -> Result<Value, DispatchError> {
        validate_room_name(&payload.name)?;

        if self.store.get_room_by_name(&payload.name).await?.is_some() {
            return Err(DispatchError::conflict("A room with that name already exists"));
        }

        let display_name = payload
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&payload.name);

        let room = self
            .store
            .create_room(
                &payload.name,
                display_name,
                &session.identity.user_id,
                payload.is_public,
            )
            .await?;

        self.subscriptions.subscribe(&session.session_id, &room.id);

        if room.is_public {
            // Deliberately announced to every connected session, not just
            // interested ones. Revisit if room/session counts grow large.
            self.broadcast_all(ServerFrame::event(
                EventName::ROOM_CREATED,
                json!({ "room": room }),
            ));
        }

        Ok(json!({ "room": room }))
    }

    async fn join_room(
        &self,
        session: &Arc<ConnectionSession>,
        payload: JoinRoomPayload,
    ) -> Result<Value, DispatchError> {
        let room = self
            .store
            .get_room_by_id(&payload.room_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("Room not found"))?;
        if !room.is_public {
            return Err(DispatchError::forbidden("Room is private"));
        }

        let already_member = self
            .store
            .is_room_member(&room.id, &session.identity.user_id)
            .await?;
        self.store
            .join_room(&room.id, &session.identity.user_id)
            .await?;
        self.subscriptions.subscribe(&session.session_id, &room.id);

        let messages = self.store.get_room_messages(&room.id, self.history_limit).await?;

        // Only a genuinely new membership is announced; re-joining (or a
        // second session joining) stays quiet.
        if !already_member {
            self.send_to_room(
                &room.id,
                Some(&session.session_id),
                ServerFrame::event(
                    EventName::USER_JOINED_ROOM,
                    json!({ "room_id": room.id, "user": user_json(&session.identity) }),
                ),
            );
        }

        Ok(json!({ "room": room, "messages": messages }))
    }

    async fn leave_room(
        &self,
        session: &Arc<ConnectionSession>,
        payload: LeaveRoomPayload,
    ) -> Result<Value, DispatchError> {
        let room = self
            .store
            .get_room_by_id(&payload.room_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("Room not found"))?;

        let is_member = self
            .store
            .is_room_member(&room.id, &session.identity.user_id)
            .await?;
        if !is_member {
            return Err(DispatchError::forbidden("You are not a member of this room"));
        }
        if room.owner_id == session.identity.user_id {
            return Err(DispatchError::forbidden(
                "The owner cannot leave; delete the room instead",
            ));
        }

        self.store
            .leave_room(&room.id, &session.identity.user_id)
            .await?;
        self.subscriptions.unsubscribe(&session.session_id, &room.id);

        self.send_to_room(
            &room.id,
            Some(&session.session_id),
            ServerFrame::event(
                EventName::USER_LEFT_ROOM,
                json!({ "room_id": room.id, "user": user_json(&session.identity) }),
            ),
        );

        Ok(json!({ "room_id": room.id }))
    }

    async fn room_message(
        &self,
        session: &Arc<ConnectionSession>,
        payload: RoomMessagePayload,
    ) -> Result<Value, DispatchError> {
        let content = self.validate_content(&payload.content)?;

        let is_member = self
            .store
            .is_room_member(&payload.room_id, &session.identity.user_id)
            .await?;
        if !is_member {
            return Err(DispatchError::forbidden("You are not a member of this room"));
        }

        let message = Message::room(&payload.room_id, &session.identity.user_id, content);
        self.store.save_message(&message).await?;

        // Everyone currently listening, the sender's own session included.
        self.send_to_room(
            &payload.room_id,
            None,
            ServerFrame::event(EventName::ROOM_MESSAGE, json!({ "message": message })),
        );

        Ok(json!({ "message": message }))
    }

    async fn direct_message(
        &self,
        session: &Arc<ConnectionSession>,
        payload: DirectMessagePayload,
    ) -> Result<Value, DispatchError> {
        let content = self.validate_content(&payload.content)?;

        let recipient = self
            .store
            .get_user_by_id(&payload.recipient_id)
            .await?
            .ok_or_else(|| DispatchError::not_found("Recipient not found"))?;

        let message = Message::direct(&session.identity.user_id, &recipient.id, content);
        self.store.save_message(&message).await?;

        // Persisting succeeds regardless of presence; real-time delivery
        // goes to the recipient's live sessions plus the sender's own (so
        // every device of the sender sees the echo).
        let frame = ServerFrame::event(EventName::DIRECT_MESSAGE, json!({ "message": message }));
        self.send_to_user(&recipient.id, frame.clone());
        if recipient.id != session.identity.user_id {
            self.send_to_user(&session.identity.user_id, frame);
        }

        Ok(json!({ "message": message }))
    }

    /// Typing indicators: nothing persisted, no membership enforcement,
    /// failures silently ignored.
    fn typing(
        &self,
        session: &Arc<ConnectionSession>,
        payload: TypingPayload,
        event_name: &str,
    ) -> Result<Value, DispatchError> {
        self.send_to_room(
            &payload.room_id,
            Some(&session.session_id),
            ServerFrame::event(
                event_name,
                json!({ "room_id": payload.room_id, "user": user_json(&session.identity) }),
            ),
        );
        Ok(Value::Null)
    }

    async fn get_public_rooms(&self) -> Result<Value, DispatchError> {
        let rooms = self.store.get_public_rooms().await?;
        Ok(json!({ "rooms": rooms }))
    }

    async fn get_room_members(
        &self,
        session: &Arc<ConnectionSession>,
        payload: GetRoomMembersPayload,
    ) -> Result<Value, DispatchError> {
        let is_member = self
            .store
            .is_room_member(&payload.room_id, &session.identity.user_id)
            .await?;
        if !is_member {
            return Err(DispatchError::forbidden("You are not a member of this room"));
        }
        let members = self.store.get_room_members(&payload.room_id).await?;
        Ok(json!({ "members": members }))
    }

    async fn get_direct_messages(
        &self,
        session: &Arc<ConnectionSession>,
        payload: GetDirectMessagesPayload,
    ) -> Result<Value, DispatchError> {
        let limit = payload
            .limit
            .unwrap_or(self.history_limit)
            .min(MAX_HISTORY_LIMIT);
        let messages = self
            .store
            .get_direct_messages(&session.identity.user_id, &payload.user_id, limit)
            .await?;
        Ok(json!({ "messages": messages }))
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    fn broadcast_all(&self, frame: ServerFrame) {
        for session in self.connections.all() {
            session.send(frame.clone());
        }
    }

    fn broadcast_except(&self, except_session_id: &str, frame: ServerFrame) {
        for session in self.connections.all() {
            if session.session_id != except_session_id {
                session.send(frame.clone());
            }
        }
    }

    fn send_to_room(&self, room_id: &str, exclude_session_id: Option<&str>, frame: ServerFrame) {
        for session_id in self.subscriptions.subscribers_of(room_id) {
            if exclude_session_id == Some(session_id.as_str()) {
                continue;
            }
            if let Some(session) = self.connections.get(&session_id) {
                session.send(frame.clone());
            }
        }
    }

    fn send_to_user(&self, user_id: &str, frame: ServerFrame) {
        for session_id in self.presence.sessions_for(user_id) {
            if let Some(session) = self.connections.get(&session_id) {
                session.send(frame.clone());
            }
        }
    }

    /// The global online-user snapshot, sorted by username for stable output.
    fn online_snapshot(&self) -> Value {
        let mut users: Vec<(String, String)> = Vec::new();
        for user_id in self.presence.online_user_ids() {
            let username = self
                .presence
                .sessions_for(&user_id)
                .iter()
                .find_map(|sid| self.connections.get(sid))
                .map(|s| s.identity.username.clone());
            if let Some(username) = username {
                users.push((user_id, username));
            }
        }
        users.sort_by(|a, b| a.1.cmp(&b.1));
        let count = users.len();
        let users: Vec<Value> = users
            .into_iter()
            .map(|(id, username)| json!({ "id": id, "username": username }))
            .collect();
        json!({ "users": users, "count": count })
    }

    fn validate_content<'a>(&self, content: &'a str) -> Result<&'a str, DispatchError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::validation("Message content is required"));
        }
        if trimmed.chars().count() > self.max_message_len {
            return Err(DispatchError::validation(format!(
                "Message content must be {} characters or fewer",
                self.max_message_len
            )));
        }
        Ok(trimmed)
    }
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, DispatchError> {
    serde_json::from_value(data)
        .map_err(|err| DispatchError::validation(format!("Invalid payload: {err}")))
}

fn user_json(identity: &Identity) -> Value {
    json!({ "id": identity.user_id, "username": identity.username })
}

fn validate_room_name(name: &str) -> Result<(), DispatchError> {
    if name.len() < ROOM_NAME_MIN_LEN || name.len() > ROOM_NAME_MAX_LEN {
        return Err(DispatchError::validation(
            "Room name must be between 3 and 100 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(DispatchError::validation(
            "Room name may only contain lowercase letters, digits, and hyphens",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_name_rules() {
        assert!(validate_room_name("general").is_ok());
        assert!(validate_room_name("dev-chat-2").is_ok());
        assert!(validate_room_name("abc").is_ok());
        assert!(validate_room_name(&"a".repeat(100)).is_ok());

        assert!(validate_room_name("ab").is_err());
        assert!(validate_room_name(&"a".repeat(101)).is_err());
        assert!(validate_room_name("General").is_err());
        assert!(validate_room_name("has space").is_err());
        assert!(validate_room_name("emoji-🦀").is_err());
        assert!(validate_room_name("under_score").is_err());
    }

    #[test]
    fn content_rules() {
        let dispatcher = Dispatcher::new(Arc::new(crate::store::MemoryStore::new()), 50, 5000);

        assert_eq!(dispatcher.validate_content("  hi  ").unwrap(), "hi");
        assert!(dispatcher.validate_content("").is_err());
        assert!(dispatcher.validate_content("   ").is_err());
        assert!(dispatcher.validate_content(&"x".repeat(5000)).is_ok());
        assert!(dispatcher.validate_content(&"x".repeat(5001)).is_err());
    }
}
