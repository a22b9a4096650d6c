//! Realtime presence channel
//!
//! Tracks online/offline plus last-seen per player, separate from the document
//! store. A connection registers its offline rollback up front: the record it
//! wants written if the connection dies. The rollback fires on guard drop, so
//! an abrupt disconnect (crash, network loss) still converges on "offline"
//! without client cooperation. Every change is mirrored into the profile store
//! by [`spawn_mirror`], keeping the two eventually consistent.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::PlayerStore;
use crate::util::subscription::{Feed, Subscription};
use crate::util::time::unix_millis;

/// Presence value at a player's path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceRecord {
    pub is_online: bool,
    pub last_seen_at: u64,
}

/// A presence change notification
#[derive(Debug, Clone, Copy)]
pub struct PresenceUpdate {
    pub uid: Uuid,
    pub record: PresenceRecord,
}

struct Channel {
    records: DashMap<Uuid, PresenceRecord>,
    feed: Feed<PresenceUpdate>,
}

/// The presence channel shared across connections
#[derive(Clone)]
pub struct PresenceChannel {
    inner: Arc<Channel>,
}

impl Default for PresenceChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Channel {
                records: DashMap::new(),
                feed: Feed::new(256, "presence"),
            }),
        }
    }

    /// Mark `uid` online and register the offline rollback. The returned guard
    /// must live as long as the connection; dropping it applies the rollback.
    pub fn connect(&self, uid: Uuid) -> ConnectionGuard {
        self.write(
            uid,
            PresenceRecord {
                is_online: true,
                last_seen_at: unix_millis(),
            },
        );
        info!(user_id = %uid, "Presence: online");
        ConnectionGuard {
            channel: self.clone(),
            uid,
            released: false,
        }
    }

    /// Current record at a player's path
    pub fn get(&self, uid: Uuid) -> Option<PresenceRecord> {
        self.inner.records.get(&uid).map(|r| *r)
    }

    pub fn online_count(&self) -> usize {
        self.inner.records.iter().filter(|r| r.is_online).count()
    }

    /// Subscribe to all presence changes
    pub fn subscribe(&self) -> Subscription<PresenceUpdate> {
        self.inner.feed.subscribe()
    }

    fn write(&self, uid: Uuid, record: PresenceRecord) {
        self.inner.records.insert(uid, record);
        self.inner.feed.publish(PresenceUpdate { uid, record });
    }

    fn mark_offline(&self, uid: Uuid) {
        self.write(
            uid,
            PresenceRecord {
                is_online: false,
                last_seen_at: unix_millis(),
            },
        );
        info!(user_id = %uid, "Presence: offline");
    }
}

/// Live connection handle; going out of scope is the disconnect trigger.
pub struct ConnectionGuard {
    channel: PresenceChannel,
    uid: Uuid,
    released: bool,
}

impl ConnectionGuard {
    /// Graceful disconnect (logout). Applies the offline record immediately
    /// and disarms the drop rollback.
    pub fn disconnect(mut self) {
        self.channel.mark_offline(self.uid);
        self.released = true;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if !self.released {
            debug!(user_id = %self.uid, "Presence rollback on dropped connection");
            self.channel.mark_offline(self.uid);
        }
    }
}

/// Mirror every presence change into the authoritative profile store.
pub fn spawn_mirror(channel: PresenceChannel, players: PlayerStore) -> JoinHandle<()> {
    let mut sub = channel.subscribe();
    tokio::spawn(async move {
        while let Some(update) = sub.next().await {
            players.apply_presence(update.uid, &update.record);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_then_drop_converges_on_offline() {
        let channel = PresenceChannel::new();
        let uid = Uuid::new_v4();

        let guard = channel.connect(uid);
        assert!(channel.get(uid).unwrap().is_online);
        assert_eq!(channel.online_count(), 1);

        // Abrupt disconnect: the guard is dropped, never released.
        drop(guard);
        assert!(!channel.get(uid).unwrap().is_online);
        assert_eq!(channel.online_count(), 0);
    }

    #[tokio::test]
    async fn graceful_disconnect_writes_offline_once() {
        let channel = PresenceChannel::new();
        let uid = Uuid::new_v4();
        let mut sub = channel.subscribe();

        channel.connect(uid).disconnect();

        assert!(sub.next().await.unwrap().record.is_online);
        assert!(!sub.next().await.unwrap().record.is_online);
        // No second offline write from the drop rollback.
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn profile_mirror_follows_the_channel() {
        let channel = PresenceChannel::new();
        let players = PlayerStore::new();
        let uid = Uuid::new_v4();
        players.ensure_profile(uid, "Asha", None);

        // Drive the mirror by hand; the spawned task does the same thing.
        let mut sub = channel.subscribe();
        let guard = channel.connect(uid);
        let update = sub.next().await.unwrap();
        players.apply_presence(update.uid, &update.record);
        assert!(players.get(uid).unwrap().is_online);

        drop(guard);
        let update = sub.next().await.unwrap();
        players.apply_presence(update.uid, &update.record);
        let profile = players.get(uid).unwrap();
        assert!(!profile.is_online);
        assert!(profile.last_seen_at.is_some());
    }
}
