//! WebSocket protocol message definitions
//! These are the wire types for the realtime channel: presence, live request
//! and chat feeds, and user notices.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notify::NoticeKind;
use crate::store::chats::Message;
use crate::store::requests::ChatRequest;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Start the live tail of a chat room
    SubscribeChat { room_id: String },

    /// Stop the live tail of a chat room
    UnsubscribeChat { room_id: String },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { user_id: Uuid, server_time: u64 },

    /// A new pending request addressed to this user
    RequestReceived { request: ChatRequest },

    /// A request this user sent or received changed status
    RequestUpdated { request: ChatRequest },

    /// A message appended to a subscribed room
    MessageAppended { room_id: String, message: Message },

    /// A player's presence changed
    PresenceChanged {
        user_id: Uuid,
        is_online: bool,
        last_seen_at: u64,
    },

    /// A user-visible notice (toast)
    Notice { kind: NoticeKind, text: String },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_msgs_parse_from_tagged_json() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"subscribe_chat","room_id":"a_b"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::SubscribeChat { room_id } if room_id == "a_b"));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"ping","t":42}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Ping { t: 42 }));
    }

    #[test]
    fn server_msgs_serialize_with_snake_case_tags() {
        let json = serde_json::to_value(ServerMsg::PresenceChanged {
            user_id: Uuid::nil(),
            is_online: true,
            last_seen_at: 7,
        })
        .unwrap();
        assert_eq!(json["type"], "presence_changed");
        assert_eq!(json["is_online"], true);
    }
}
