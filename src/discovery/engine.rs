//! Discovery & matching engine
//!
//! Loads candidate players, annotates them with distance from the viewer,
//! applies distance/age filters, sorts nearest-first and attaches the
//! per-candidate chat-request relationship so the client knows which action
//! to offer.

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::discovery::geo::distance_km;
use crate::store::chats::chat_room_id;
use crate::store::players::{PlayerProfile, Sport};
use crate::store::requests::RequestStatus;
use crate::store::{PlayerStore, RequestStore};

/// Age filter bands offered by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgeBand {
    #[default]
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "18-25")]
    From18To25,
    #[serde(rename = "26-35")]
    From26To35,
    #[serde(rename = "36+")]
    From36,
}

impl AgeBand {
    /// Inclusive bounds; `None` max means open-ended.
    fn bounds(self) -> Option<(u32, Option<u32>)> {
        match self {
            AgeBand::Any => None,
            AgeBand::From18To25 => Some((18, Some(25))),
            AgeBand::From26To35 => Some((26, Some(35))),
            AgeBand::From36 => Some((36, None)),
        }
    }

    /// `Any` passes everyone, a concrete band requires a known age inside it.
    pub fn passes(self, age: Option<u32>) -> bool {
        match self.bounds() {
            None => true,
            Some((min, max)) => match age {
                Some(age) => age >= min && max.map_or(true, |max| age <= max),
                None => false,
            },
        }
    }
}

/// Discovery feed inputs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryFilter {
    /// Restrict to a primary sport
    pub sport: Option<Sport>,
    /// Distance ceiling in km; `None` means unlimited
    pub max_km: Option<f64>,
    #[serde(default)]
    pub age: AgeBand,
}

/// The action the viewer can take on a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateAction {
    /// No relationship yet
    SendRequest,
    /// An outstanding pending request; disabled in the UI
    Requested,
    /// Accepted; deep-links into the shared chat room
    Chat { room_id: String },
}

/// A discovery feed entry
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub profile: PlayerProfile,
    /// Km from the viewer, absent when either location is unknown
    pub distance_km: Option<f64>,
    pub action: CandidateAction,
}

/// True iff the candidate survives the distance ceiling.
/// With a ceiling set, an unknown distance always fails; with no ceiling,
/// everyone passes.
pub fn passes_distance(distance: Option<f64>, ceiling: Option<f64>) -> bool {
    match ceiling {
        None => true,
        Some(max) => matches!(distance, Some(d) if d <= max),
    }
}

/// Sort nearest-first; candidates with unknown distance trail in their
/// original fetch order (stable sort).
pub fn sort_by_distance(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| match (a.distance_km, b.distance_km) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// Discovery engine over the player and request stores
#[derive(Clone)]
pub struct DiscoveryEngine {
    players: PlayerStore,
    requests: RequestStore,
}

impl DiscoveryEngine {
    pub fn new(players: PlayerStore, requests: RequestStore) -> Self {
        Self { players, requests }
    }

    /// Build the discovery feed for `viewer`. Never fails: a missing viewer
    /// profile degrades to a feed without distances, logged as a warning.
    pub fn discover(&self, viewer: Uuid, filter: &DiscoveryFilter) -> Vec<Candidate> {
        let viewer_location = match self.players.get(viewer) {
            Some(profile) => profile.location(),
            None => {
                warn!(user_id = %viewer, "Discovery without a viewer profile");
                None
            }
        };

        let pending = self.requests.targets_with_status(viewer, RequestStatus::Pending);
        let accepted = self.requests.targets_with_status(viewer, RequestStatus::Accepted);

        let mut candidates: Vec<Candidate> = self
            .players
            .list(filter.sport)
            .into_iter()
            .filter(|p| p.uid != viewer)
            .map(|profile| {
                let distance = distance_km(viewer_location, profile.location());
                let action = if accepted.contains(&profile.uid) {
                    CandidateAction::Chat {
                        room_id: chat_room_id(viewer, profile.uid),
                    }
                } else if pending.contains(&profile.uid) {
                    CandidateAction::Requested
                } else {
                    CandidateAction::SendRequest
                };
                Candidate {
                    distance_km: distance,
                    profile,
                    action,
                }
            })
            .filter(|c| passes_distance(c.distance_km, filter.max_km))
            .filter(|c| filter.age.passes(c.profile.age))
            .collect();

        sort_by_distance(&mut candidates);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::players::{Gender, ProfileUpdate};

    fn candidate(distance_km: Option<f64>) -> Candidate {
        let store = PlayerStore::new();
        let profile = store.ensure_profile(Uuid::new_v4(), "P", None);
        Candidate {
            profile,
            distance_km,
            action: CandidateAction::SendRequest,
        }
    }

    #[test]
    fn distance_filter_requires_known_distance_under_ceiling() {
        assert!(passes_distance(Some(4.9), Some(5.0)));
        assert!(passes_distance(Some(5.0), Some(5.0)));
        assert!(!passes_distance(Some(5.1), Some(5.0)));
        assert!(!passes_distance(None, Some(5.0)));

        // No ceiling: everyone passes, located or not.
        assert!(passes_distance(None, None));
        assert!(passes_distance(Some(9000.0), None));
    }

    #[test]
    fn age_band_26_35_is_inclusive_and_rejects_unknown() {
        let band = AgeBand::From26To35;
        assert!(!band.passes(Some(25)));
        assert!(band.passes(Some(26)));
        assert!(band.passes(Some(35)));
        assert!(!band.passes(Some(36)));
        assert!(!band.passes(None));

        assert!(AgeBand::Any.passes(None));
        assert!(AgeBand::From36.passes(Some(80)));
        assert!(!AgeBand::From36.passes(Some(35)));
    }

    #[test]
    fn unknown_distances_sort_last() {
        let mut candidates: Vec<Candidate> =
            [None, Some(3.2), Some(1.0), None, Some(7.5)].map(candidate).into();
        sort_by_distance(&mut candidates);

        let order: Vec<Option<f64>> = candidates.iter().map(|c| c.distance_km).collect();
        assert_eq!(order, vec![Some(1.0), Some(3.2), Some(7.5), None, None]);
    }

    fn seed_player(
        store: &PlayerStore,
        name: &str,
        sport: Sport,
        age: u32,
        location: Option<(f64, f64)>,
    ) -> Uuid {
        let uid = Uuid::new_v4();
        store.ensure_profile(uid, name, None);
        store
            .update_profile(
                uid,
                ProfileUpdate {
                    name: name.into(),
                    sport,
                    secondary_sports: vec![],
                    age,
                    gender: Gender::Other,
                    rating: None,
                },
            )
            .unwrap();
        if let Some((lat, lon)) = location {
            store.update_location(uid, lat, lon).unwrap();
        }
        uid
    }

    #[test]
    fn discover_annotates_filters_and_sorts() {
        let players = PlayerStore::new();
        let requests = RequestStore::new();
        let engine = DiscoveryEngine::new(players.clone(), requests.clone());

        let viewer = seed_player(&players, "Viewer", Sport::Tennis, 30, Some((12.97, 77.59)));
        let near = seed_player(&players, "Near", Sport::Tennis, 22, Some((12.98, 77.60)));
        let far = seed_player(&players, "Far", Sport::Tennis, 30, Some((19.07, 72.87)));
        let nowhere = seed_player(&players, "Nowhere", Sport::Tennis, 30, None);

        // Unlimited ceiling includes the locationless player, trailing.
        let feed = engine.discover(viewer, &DiscoveryFilter::default());
        let uids: Vec<Uuid> = feed.iter().map(|c| c.profile.uid).collect();
        assert_eq!(uids, vec![near, far, nowhere]);

        // A ceiling drops both the far and the unlocated candidate.
        let feed = engine.discover(
            viewer,
            &DiscoveryFilter {
                max_km: Some(25.0),
                ..Default::default()
            },
        );
        let uids: Vec<Uuid> = feed.iter().map(|c| c.profile.uid).collect();
        assert_eq!(uids, vec![near]);

        // The 18-25 band keeps only Near (22); the others are 30.
        let feed = engine.discover(
            viewer,
            &DiscoveryFilter {
                age: AgeBand::From18To25,
                ..Default::default()
            },
        );
        let uids: Vec<Uuid> = feed.iter().map(|c| c.profile.uid).collect();
        assert_eq!(uids, vec![near]);
    }

    #[test]
    fn discover_reflects_request_relationships() {
        let players = PlayerStore::new();
        let requests = RequestStore::new();
        let engine = DiscoveryEngine::new(players.clone(), requests.clone());

        let viewer_uid = Uuid::new_v4();
        players.ensure_profile(viewer_uid, "Viewer", None);
        let pending_uid = Uuid::new_v4();
        players.ensure_profile(pending_uid, "Pending", None);
        let accepted_uid = Uuid::new_v4();
        players.ensure_profile(accepted_uid, "Accepted", None);

        requests
            .send(viewer_uid, "Viewer", pending_uid, None, None, None)
            .unwrap();
        let req = requests
            .send(viewer_uid, "Viewer", accepted_uid, None, None, None)
            .unwrap();
        requests
            .respond(req.id, accepted_uid, crate::store::requests::RequestDecision::Accepted)
            .unwrap();

        let feed = engine.discover(viewer_uid, &DiscoveryFilter::default());
        assert_eq!(feed.len(), 2);

        for candidate in feed {
            if candidate.profile.uid == pending_uid {
                assert_eq!(candidate.action, CandidateAction::Requested);
            } else {
                assert_eq!(
                    candidate.action,
                    CandidateAction::Chat {
                        room_id: chat_room_id(viewer_uid, accepted_uid)
                    }
                );
            }
        }
    }

    #[test]
    fn discover_without_viewer_profile_degrades_to_distanceless_feed() {
        let players = PlayerStore::new();
        let requests = RequestStore::new();
        let engine = DiscoveryEngine::new(players.clone(), requests);

        seed_player(&players, "Someone", Sport::Chess, 40, Some((1.0, 1.0)));

        let feed = engine.discover(Uuid::new_v4(), &DiscoveryFilter::default());
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].distance_km, None);
    }
}
