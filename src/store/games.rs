//! Pickup game store
//!
//! Games are created by a host, RSVP'd by any authenticated player (one entry
//! per player, last write wins) and deletable only by the host. Aggregate
//! counts are always recomputed from the rsvps map; the original clients kept
//! separate counters that drifted, which this store deliberately does not.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::store::players::Sport;
use crate::util::time::MonotonicClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rsvp {
    Yes,
    Maybe,
    No,
}

/// A pickup game document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: Uuid,
    pub sport: Sport,
    pub title: String,
    pub time: DateTime<Utc>,
    pub location: String,
    pub host_uid: Uuid,
    pub host_name: String,
    pub max_players: u32,
    pub rsvps: HashMap<Uuid, Rsvp>,
    pub created_at: u64,
}

/// RSVP tallies derived from the rsvps map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RsvpCounts {
    pub yes: usize,
    pub maybe: usize,
    pub no: usize,
}

impl Game {
    pub fn counts(&self) -> RsvpCounts {
        let mut counts = RsvpCounts { yes: 0, maybe: 0, no: 0 };
        for rsvp in self.rsvps.values() {
            match rsvp {
                Rsvp::Yes => counts.yes += 1,
                Rsvp::Maybe => counts.maybe += 1,
                Rsvp::No => counts.no += 1,
            }
        }
        counts
    }
}

/// Fields required to create a game
#[derive(Debug, Clone, Deserialize)]
pub struct NewGame {
    pub sport: Sport,
    pub title: String,
    pub time: DateTime<Utc>,
    pub location: String,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
}

fn default_max_players() -> u32 {
    11
}

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Game not found")]
    NotFound,

    #[error("Title and location must not be empty")]
    MissingFields,

    #[error("Only the host may delete a game")]
    NotHost,
}

/// In-memory game collection
#[derive(Clone)]
pub struct GameStore {
    games: Arc<DashMap<Uuid, Game>>,
    clock: Arc<MonotonicClock>,
}

impl Default for GameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GameStore {
    pub fn new() -> Self {
        Self {
            games: Arc::new(DashMap::new()),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Game> {
        self.games.get(&id).map(|g| g.clone())
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    /// Create a game. The host is automatically RSVP'd "yes".
    pub fn create(&self, host_uid: Uuid, host_name: &str, new: NewGame) -> Result<Game, GameError> {
        let title = new.title.trim();
        let location = new.location.trim();
        if title.is_empty() || location.is_empty() {
            return Err(GameError::MissingFields);
        }

        let game = Game {
            id: Uuid::new_v4(),
            sport: new.sport,
            title: title.to_string(),
            time: new.time,
            location: location.to_string(),
            host_uid,
            host_name: host_name.to_string(),
            max_players: new.max_players,
            rsvps: HashMap::from([(host_uid, Rsvp::Yes)]),
            created_at: self.clock.tick(),
        };

        info!(game_id = %game.id, host = %host_uid, "Pickup game created");
        self.games.insert(game.id, game.clone());
        Ok(game)
    }

    /// Record an RSVP. One entry per player; repeated calls overwrite.
    pub fn rsvp(&self, game_id: Uuid, player: Uuid, rsvp: Rsvp) -> Result<Game, GameError> {
        let mut entry = self.games.get_mut(&game_id).ok_or(GameError::NotFound)?;
        entry.rsvps.insert(player, rsvp);
        Ok(entry.clone())
    }

    /// Delete a game; host only.
    pub fn delete(&self, game_id: Uuid, caller: Uuid) -> Result<(), GameError> {
        let host_uid = self
            .games
            .get(&game_id)
            .map(|g| g.host_uid)
            .ok_or(GameError::NotFound)?;
        if host_uid != caller {
            return Err(GameError::NotHost);
        }
        self.games.remove(&game_id);
        info!(game_id = %game_id, "Pickup game deleted");
        Ok(())
    }

    /// All games, newest first.
    pub fn list(&self) -> Vec<Game> {
        let mut list: Vec<Game> = self.games.iter().map(|g| g.clone()).collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }
}
