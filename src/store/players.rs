//! Player profile store - typed schema and narrow update operations

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::presence::PresenceRecord;
use crate::util::time::unix_millis;

/// Sports known to the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Cricket,
    Football,
    Badminton,
    Tennis,
    Chess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// A player profile document.
///
/// Created on first sign-in, mutated only through the named update operations
/// below, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub uid: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub sport: Option<Sport>,
    #[serde(default)]
    pub secondary_sports: Vec<Sport>,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub rating: f32,
    pub image_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_online: bool,
    pub last_seen_at: Option<u64>,
    pub created_at: u64,
}

impl PlayerProfile {
    /// Last self-reported location, if both coordinates are present.
    pub fn location(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// True once a player can meaningfully appear in discovery.
    pub fn is_complete(&self) -> bool {
        self.sport.is_some() && self.location().is_some()
    }
}

/// Validated profile field-group update
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub sport: Sport,
    #[serde(default)]
    pub secondary_sports: Vec<Sport>,
    pub age: u32,
    pub gender: Gender,
    #[serde(default)]
    pub rating: Option<f32>,
}

/// Profile store errors
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Player not found")]
    NotFound,

    #[error("Name must not be empty")]
    EmptyName,

    #[error("Age must be at least 13")]
    Underage,

    #[error("Latitude/longitude out of range")]
    InvalidCoordinates,
}

/// In-memory player collection
#[derive(Clone, Default)]
pub struct PlayerStore {
    players: Arc<DashMap<Uuid, PlayerProfile>>,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a profile by id
    pub fn get(&self, uid: Uuid) -> Option<PlayerProfile> {
        self.players.get(&uid).map(|p| p.clone())
    }

    /// Fetch the whole collection, optionally narrowed to a primary sport.
    /// Insertion order is not guaranteed; callers sort as needed.
    pub fn list(&self, sport: Option<Sport>) -> Vec<PlayerProfile> {
        self.players
            .iter()
            .map(|entry| entry.clone())
            .filter(|p| sport.is_none() || p.sport == sport)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Get or create the profile backing an authenticated identity.
    pub fn ensure_profile(&self, uid: Uuid, name: &str, email: Option<&str>) -> PlayerProfile {
        if let Some(existing) = self.get(uid) {
            return existing;
        }
        let profile = PlayerProfile {
            uid,
            name: name.to_string(),
            email: email.map(str::to_string),
            sport: None,
            secondary_sports: Vec::new(),
            age: None,
            gender: None,
            rating: 0.0,
            image_url: None,
            latitude: None,
            longitude: None,
            is_online: false,
            last_seen_at: None,
            created_at: unix_millis(),
        };
        info!(user_id = %uid, "Created player profile");
        self.players.entry(uid).or_insert(profile).clone()
    }

    /// Apply a validated profile edit. Rating is clamped to the 0.0-5.0 scale.
    pub fn update_profile(&self, uid: Uuid, update: ProfileUpdate) -> Result<PlayerProfile, PlayerError> {
        let name = update.name.trim();
        if name.is_empty() {
            return Err(PlayerError::EmptyName);
        }
        if update.age < 13 {
            return Err(PlayerError::Underage);
        }

        let mut entry = self.players.get_mut(&uid).ok_or(PlayerError::NotFound)?;
        entry.name = name.to_string();
        entry.sport = Some(update.sport);
        entry.secondary_sports = update.secondary_sports;
        entry.age = Some(update.age);
        entry.gender = Some(update.gender);
        if let Some(rating) = update.rating {
            entry.rating = rating.clamp(0.0, 5.0);
        }
        Ok(entry.clone())
    }

    /// Location refresh. Coordinates are rounded to four decimal places, the
    /// precision the clients report.
    pub fn update_location(&self, uid: Uuid, lat: f64, lon: f64) -> Result<PlayerProfile, PlayerError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(PlayerError::InvalidCoordinates);
        }
        let mut entry = self.players.get_mut(&uid).ok_or(PlayerError::NotFound)?;
        entry.latitude = Some((lat * 10_000.0).round() / 10_000.0);
        entry.longitude = Some((lon * 10_000.0).round() / 10_000.0);
        Ok(entry.clone())
    }

    /// Set the durable profile image URL after a successful upload.
    pub fn set_image_url(&self, uid: Uuid, url: String) -> Result<(), PlayerError> {
        let mut entry = self.players.get_mut(&uid).ok_or(PlayerError::NotFound)?;
        entry.image_url = Some(url);
        Ok(())
    }

    /// Mirror a presence-channel change into the authoritative profile.
    /// Unknown uids are ignored; the mirror is eventually consistent.
    pub fn apply_presence(&self, uid: Uuid, record: &PresenceRecord) {
        if let Some(mut entry) = self.players.get_mut(&uid) {
            entry.is_online = record.is_online;
            entry.last_seen_at = Some(record.last_seen_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_profile() -> (PlayerStore, Uuid) {
        let store = PlayerStore::new();
        let uid = Uuid::new_v4();
        store.ensure_profile(uid, "Asha", Some("asha@example.com"));
        (store, uid)
    }

    #[test]
    fn ensure_profile_is_idempotent() {
        let (store, uid) = store_with_profile();
        let again = store.ensure_profile(uid, "Different", None);
        assert_eq!(again.name, "Asha");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_rejects_underage_and_blank_name() {
        let (store, uid) = store_with_profile();
        let update = ProfileUpdate {
            name: "Asha".into(),
            sport: Sport::Tennis,
            secondary_sports: vec![],
            age: 12,
            gender: Gender::Female,
            rating: None,
        };
        assert!(matches!(store.update_profile(uid, update), Err(PlayerError::Underage)));

        let update = ProfileUpdate {
            name: "   ".into(),
            sport: Sport::Tennis,
            secondary_sports: vec![],
            age: 21,
            gender: Gender::Female,
            rating: None,
        };
        assert!(matches!(store.update_profile(uid, update), Err(PlayerError::EmptyName)));
    }

    #[test]
    fn rating_is_clamped() {
        let (store, uid) = store_with_profile();
        let update = ProfileUpdate {
            name: "Asha".into(),
            sport: Sport::Tennis,
            secondary_sports: vec![Sport::Badminton],
            age: 21,
            gender: Gender::Female,
            rating: Some(9.5),
        };
        let profile = store.update_profile(uid, update).unwrap();
        assert_eq!(profile.rating, 5.0);
    }

    #[test]
    fn location_is_rounded_and_validated() {
        let (store, uid) = store_with_profile();
        let profile = store.update_location(uid, 12.971598, 77.594566).unwrap();
        assert_eq!(profile.latitude, Some(12.9716));
        assert_eq!(profile.longitude, Some(77.5946));

        assert!(matches!(
            store.update_location(uid, 91.0, 0.0),
            Err(PlayerError::InvalidCoordinates)
        ));
    }

    #[test]
    fn list_filters_by_primary_sport() {
        let (store, uid) = store_with_profile();
        let update = ProfileUpdate {
            name: "Asha".into(),
            sport: Sport::Cricket,
            secondary_sports: vec![],
            age: 21,
            gender: Gender::Female,
            rating: None,
        };
        store.update_profile(uid, update).unwrap();
        store.ensure_profile(Uuid::new_v4(), "Ben", None);

        assert_eq!(store.list(Some(Sport::Cricket)).len(), 1);
        assert_eq!(store.list(None).len(), 2);
    }
}
