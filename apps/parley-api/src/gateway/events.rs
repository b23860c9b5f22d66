//! Wire-format frames and event payloads for the gateway socket.
//!
//! Every frame is a JSON text message. Inbound frames carry an event name,
//! an optional client-chosen `ack` correlation id, and a payload. Outbound
//! frames are either dispatched events or acks echoing the correlation id
//! with a `{ success, data?, error? }` result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AckError, DispatchError};

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A frame received from the client.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub ack: Option<u64>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomPayload {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct JoinRoomPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaveRoomPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RoomMessagePayload {
    pub room_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct DirectMessagePayload {
    pub recipient_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct TypingPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GetRoomMembersPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GetDirectMessagesPayload {
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A frame sent from the server to the client.
#[derive(Debug, Clone, Serialize)]
pub struct ServerFrame {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
}

impl ServerFrame {
    /// Build a dispatched event frame.
    pub fn event(name: &str, data: Value) -> Self {
        Self {
            event: name.to_string(),
            ack: None,
            success: None,
            data,
            error: None,
        }
    }

    /// Build a successful ack for a client correlation id.
    pub fn ack_ok(ack: u64, data: Value) -> Self {
        Self {
            event: EventName::ACK.to_string(),
            ack: Some(ack),
            success: Some(true),
            data,
            error: None,
        }
    }

    /// Build a failed ack carrying the error taxonomy kind and message.
    pub fn ack_err(ack: u64, err: &DispatchError) -> Self {
        Self {
            event: EventName::ACK.to_string(),
            ack: Some(ack),
            success: Some(false),
            data: Value::Null,
            error: Some(AckError::from(err)),
        }
    }
}

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const ACK: &'static str = "ack";
    pub const WELCOME: &'static str = "welcome";
    pub const USER_ROOMS: &'static str = "user-rooms";
    pub const ONLINE_USERS: &'static str = "online-users";
    pub const USER_JOINED: &'static str = "user-joined";
    pub const USER_LEFT: &'static str = "user-left";
    pub const ROOM_CREATED: &'static str = "room-created";
    pub const USER_JOINED_ROOM: &'static str = "user-joined-room";
    pub const USER_LEFT_ROOM: &'static str = "user-left-room";
    pub const ROOM_MESSAGE: &'static str = "room-message";
    pub const DIRECT_MESSAGE: &'static str = "direct-message";
    pub const TYPING_ROOM: &'static str = "typing-room";
    pub const STOP_TYPING_ROOM: &'static str = "stop-typing-room";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_ok_serializes_without_error_field() {
        let frame = ServerFrame::ack_ok(7, serde_json::json!({"x": 1}));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "ack");
        assert_eq!(json["ack"], 7);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["x"], 1);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn ack_err_serializes_kind_and_message() {
        let err = DispatchError::forbidden("You are not a member of this room");
        let frame = ServerFrame::ack_err(3, &err);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "FORBIDDEN");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn client_frame_parses_with_and_without_ack() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"event":"join-room","ack":1,"data":{"room_id":"room_x"}}"#)
                .unwrap();
        assert_eq!(frame.event, "join-room");
        assert_eq!(frame.ack, Some(1));

        let frame: ClientFrame =
            serde_json::from_str(r#"{"event":"typing-room","data":{"room_id":"room_x"}}"#).unwrap();
        assert!(frame.ack.is_none());
    }
}
