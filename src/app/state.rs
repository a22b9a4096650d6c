//! Application state shared across routes

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::discovery::DiscoveryEngine;
use crate::notify::Notifier;
use crate::presence::{self, PresenceChannel};
use crate::store::{ChatStore, GameStore, MediaStore, PlayerStore, RequestStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub players: PlayerStore,
    pub requests: RequestStore,
    pub chats: ChatStore,
    pub games: GameStore,
    pub media: MediaStore,
    pub presence: PresenceChannel,
    pub notifier: Notifier,
    pub discovery: DiscoveryEngine,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let players = PlayerStore::new();
        let requests = RequestStore::new();
        let chats = ChatStore::new();
        let games = GameStore::new();
        let media = MediaStore::new(config.max_upload_bytes);
        let presence = PresenceChannel::new();
        let notifier = Notifier::new();
        let discovery = DiscoveryEngine::new(players.clone(), requests.clone());

        Self {
            config,
            players,
            requests,
            chats,
            games,
            media,
            presence,
            notifier,
            discovery,
        }
    }

    /// Spawn the background tasks owned by the state (the presence mirror).
    pub fn spawn_background(&self) -> JoinHandle<()> {
        presence::spawn_mirror(self.presence.clone(), self.players.clone())
    }

    /// Absolute retrieval URL for a stored media key.
    pub fn media_url(&self, key: &str) -> String {
        format!("{}/media/{}", self.config.public_base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{CandidateAction, DiscoveryFilter};
    use crate::store::chats::chat_room_id;
    use crate::store::requests::{RequestDecision, RequestStatus};
    use uuid::Uuid;

    /// The full request lifecycle as a user would drive it: A discovers B,
    /// sends a request, B sees and accepts it, A's feed flips to a chat link
    /// and the first message lands in the shared room.
    #[tokio::test]
    async fn request_lifecycle_end_to_end() {
        let state = AppState::new(Config::for_tests());

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        state.players.ensure_profile(a, "Asha", None);
        state.players.ensure_profile(b, "Ben", None);

        // A has no relation to B yet.
        let feed = state.discovery.discover(a, &DiscoveryFilter::default());
        assert_eq!(feed[0].action, CandidateAction::SendRequest);

        // A sends a request: exactly one pending document exists.
        let req = state
            .requests
            .send(a, "Asha", b, Some("Ben".into()), None, None)
            .unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(state.requests.len(), 1);

        let feed = state.discovery.discover(a, &DiscoveryFilter::default());
        assert_eq!(feed[0].action, CandidateAction::Requested);

        // B's requests view shows exactly that request.
        let incoming = state.requests.incoming_pending(b);
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].id, req.id);

        // B accepts; A's discovery now deep-links to the shared room.
        state.requests.respond(req.id, b, RequestDecision::Accepted).unwrap();
        assert!(state.requests.incoming_pending(b).is_empty());

        let room_id = chat_room_id(a, b);
        let feed = state.discovery.discover(a, &DiscoveryFilter::default());
        assert_eq!(
            feed[0].action,
            CandidateAction::Chat { room_id: room_id.clone() }
        );

        // First message lazily creates the chat for both sides.
        state.chats.send_message(&room_id, a, "Hi Ben!").unwrap();
        assert_eq!(state.chats.chats_for(b).len(), 1);
        assert_eq!(state.chats.history(&room_id)[0].text, "Hi Ben!");
    }

    #[tokio::test]
    async fn presence_mirror_runs_in_background() {
        let state = AppState::new(Config::for_tests());
        let uid = Uuid::new_v4();
        state.players.ensure_profile(uid, "Asha", None);

        let mirror = state.spawn_background();

        let guard = state.presence.connect(uid);
        // Give the mirror task a chance to drain the feed.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if state.players.get(uid).unwrap().is_online {
                break;
            }
        }
        assert!(state.players.get(uid).unwrap().is_online);

        guard.disconnect();
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if !state.players.get(uid).unwrap().is_online {
                break;
            }
        }
        assert!(!state.players.get(uid).unwrap().is_online);

        mirror.abort();
    }
}
