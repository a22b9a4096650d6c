//! Chat and message store
//!
//! A chat is keyed by its canonical room id: the two participant uids sorted
//! ascending and joined with `_`, so both sides derive the same key with no
//! lookup or handshake. Chats are created lazily on first message and never
//! deleted; messages are immutable once appended.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::util::subscription::{Feed, Subscription};
use crate::util::time::MonotonicClock;

const ROOM_ID_SEPARATOR: char = '_';

/// Canonical two-party room id. Order-insensitive: both participants compute
/// the identical value independently.
pub fn chat_room_id(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}{}", lo, ROOM_ID_SEPARATOR, hi)
}

/// Split a room id back into its participants. A room always names exactly
/// two distinct players; an id with both halves equal is malformed.
pub fn room_participants(room_id: &str) -> Option<(Uuid, Uuid)> {
    let (a, b) = room_id.split_once(ROOM_ID_SEPARATOR)?;
    let (a, b): (Uuid, Uuid) = (a.parse().ok()?, b.parse().ok()?);
    if a == b {
        return None;
    }
    Some((a, b))
}

/// The participant that is not `me`, derived from the room id alone.
pub fn other_participant(room_id: &str, me: Uuid) -> Option<Uuid> {
    let (a, b) = room_participants(room_id)?;
    if a == me {
        Some(b)
    } else if b == me {
        Some(a)
    } else {
        None
    }
}

/// Chat metadata, upserted on every send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub room_id: String,
    pub participants: [Uuid; 2],
    pub last_message_at: u64,
}

/// An immutable chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub from: Uuid,
    pub to: Uuid,
    pub text: String,
    /// Server-assigned, strictly increasing within a store
    pub created_at: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message text must not be empty")]
    EmptyText,

    #[error("Malformed chat room id")]
    BadRoomId,

    #[error("Sender is not a participant of this chat")]
    NotParticipant,
}

struct Room {
    messages: Mutex<Vec<Message>>,
    feed: Feed<Message>,
}

impl Room {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            feed: Feed::new(256, "chat"),
        }
    }
}

/// In-memory chat collection
#[derive(Clone)]
pub struct ChatStore {
    chats: Arc<DashMap<String, Chat>>,
    rooms: Arc<DashMap<String, Arc<Room>>>,
    clock: Arc<MonotonicClock>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            chats: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    fn room(&self, room_id: &str) -> Arc<Room> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Room::new()))
            .clone()
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    /// Append a message to a room. Validates the text and the sender's
    /// membership before any write; upserts the chat metadata afterwards
    /// (idempotent merge, safe to repeat).
    pub fn send_message(
        &self,
        room_id: &str,
        sender: Uuid,
        text: &str,
    ) -> Result<Message, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyText);
        }
        let to = other_participant(room_id, sender).ok_or_else(|| {
            if room_participants(room_id).is_none() {
                ChatError::BadRoomId
            } else {
                ChatError::NotParticipant
            }
        })?;

        let room = self.room(room_id);
        let message = {
            // Lock spans timestamp assignment and append so no later append can
            // carry an earlier timestamp.
            let mut messages = room.messages.lock();
            let message = Message {
                id: Uuid::new_v4(),
                from: sender,
                to,
                text: text.to_string(),
                created_at: self.clock.tick(),
            };
            messages.push(message.clone());
            message
        };

        self.upsert_chat(room_id, sender, to, message.created_at);
        room.feed.publish(message.clone());

        debug!(room_id, from = %sender, "Message appended");
        Ok(message)
    }

    fn upsert_chat(&self, room_id: &str, a: Uuid, b: Uuid, at: u64) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        self.chats
            .entry(room_id.to_string())
            .and_modify(|chat| chat.last_message_at = chat.last_message_at.max(at))
            .or_insert_with(|| Chat {
                room_id: room_id.to_string(),
                participants: [lo, hi],
                last_message_at: at,
            });
    }

    /// Full message history of a room in created_at order.
    pub fn history(&self, room_id: &str) -> Vec<Message> {
        match self.rooms.get(room_id) {
            Some(room) => room.messages.lock().clone(),
            None => Vec::new(),
        }
    }

    /// Live tail of a room. Only messages appended after subscribing are
    /// delivered; pair with [`ChatStore::history`] for the full picture.
    pub fn subscribe(&self, room_id: &str) -> Subscription<Message> {
        self.room(room_id).feed.subscribe()
    }

    /// Chats `uid` participates in, most recent activity first.
    pub fn chats_for(&self, uid: Uuid) -> Vec<Chat> {
        let mut list: Vec<Chat> = self
            .chats
            .iter()
            .filter(|c| c.participants.contains(&uid))
            .map(|c| c.clone())
            .collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_order_insensitive() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let id = chat_room_id(a, b);
        assert_eq!(id, chat_room_id(b, a));

        let (lo, hi) = room_participants(&id).unwrap();
        assert!(lo <= hi);
        assert_eq!(other_participant(&id, a), Some(b));
        assert_eq!(other_participant(&id, b), Some(a));
        assert_eq!(other_participant(&id, Uuid::new_v4()), None);
    }

    #[test]
    fn room_id_sorts_lexicographically() {
        let a: Uuid = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        let b: Uuid = "22222222-2222-2222-2222-222222222222".parse().unwrap();
        assert_eq!(chat_room_id(b, a), format!("{}_{}", a, b));
    }

    #[test]
    fn empty_or_whitespace_text_is_rejected_without_a_write() {
        let store = ChatStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = chat_room_id(a, b);

        assert!(matches!(store.send_message(&room, a, "   "), Err(ChatError::EmptyText)));
        assert!(store.history(&room).is_empty());
        assert_eq!(store.chat_count(), 0);
    }

    #[test]
    fn self_chat_room_is_malformed() {
        let store = ChatStore::new();
        let uid = Uuid::new_v4();
        let room = format!("{}_{}", uid, uid);

        assert!(room_participants(&room).is_none());
        assert_eq!(other_participant(&room, uid), None);
        assert!(matches!(
            store.send_message(&room, uid, "hello me"),
            Err(ChatError::BadRoomId)
        ));
        assert_eq!(store.chat_count(), 0);
    }

    #[test]
    fn sender_must_be_a_participant() {
        let store = ChatStore::new();
        let room = chat_room_id(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(
            store.send_message(&room, Uuid::new_v4(), "hi"),
            Err(ChatError::NotParticipant)
        ));
        assert!(matches!(
            store.send_message("not-a-room", Uuid::new_v4(), "hi"),
            Err(ChatError::BadRoomId)
        ));
    }

    #[test]
    fn history_is_ordered_and_text_trimmed() {
        let store = ChatStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = chat_room_id(a, b);

        store.send_message(&room, a, "  first  ").unwrap();
        store.send_message(&room, b, "second").unwrap();
        store.send_message(&room, a, "third").unwrap();

        let history = store.history(&room);
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(history.windows(2).all(|w| w[0].created_at < w[1].created_at));
        assert_eq!(history[0].to, b);
        assert_eq!(history[1].to, a);
    }

    #[test]
    fn chat_meta_upsert_is_idempotent() {
        let store = ChatStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = chat_room_id(a, b);

        let first = store.send_message(&room, a, "one").unwrap();
        let second = store.send_message(&room, b, "two").unwrap();

        assert_eq!(store.chat_count(), 1);
        let chats = store.chats_for(a);
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].last_message_at, second.created_at);
        assert!(chats[0].last_message_at > first.created_at);
    }

    #[test]
    fn chats_for_orders_by_recency() {
        let store = ChatStore::new();
        let me = Uuid::new_v4();
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let room_x = chat_room_id(me, x);
        let room_y = chat_room_id(me, y);

        store.send_message(&room_x, me, "older").unwrap();
        store.send_message(&room_y, me, "newer").unwrap();

        let chats = store.chats_for(me);
        let rooms: Vec<&str> = chats.iter().map(|c| c.room_id.as_str()).collect();
        assert_eq!(rooms, vec![room_y.as_str(), room_x.as_str()]);
        assert!(store.chats_for(x).len() == 1);
    }

    #[tokio::test]
    async fn subscribers_observe_messages_in_timestamp_order() {
        let store = ChatStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = chat_room_id(a, b);

        let mut sub = store.subscribe(&room);
        store.send_message(&room, a, "t1").unwrap();
        store.send_message(&room, b, "t2").unwrap();
        store.send_message(&room, a, "t3").unwrap();

        let m1 = sub.next().await.unwrap();
        let m2 = sub.next().await.unwrap();
        let m3 = sub.next().await.unwrap();
        assert_eq!([m1.text.as_str(), m2.text.as_str(), m3.text.as_str()], ["t1", "t2", "t3"]);
        assert!(m1.created_at < m2.created_at && m2.created_at < m3.created_at);
        sub.unsubscribe();
    }
}
