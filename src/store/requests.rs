//! Chat request store and lifecycle state machine
//!
//! A request starts `pending` and is resolved exactly once by its recipient to
//! `accepted` or `rejected`; both outcomes are terminal. At most one pending
//! request may exist for an ordered (from, to) pair. The original clients only
//! checked this best-effort before writing; here the check-then-insert runs
//! under the store lock, so the race is closed at this boundary. A rejected
//! pair may be requested again later (the guard only covers `pending`).

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::store::players::Sport;
use crate::util::subscription::{Feed, Subscription};
use crate::util::time::MonotonicClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Recipient decision on a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDecision {
    Accepted,
    Rejected,
}

impl From<RequestDecision> for RequestStatus {
    fn from(decision: RequestDecision) -> Self {
        match decision {
            RequestDecision::Accepted => RequestStatus::Accepted,
            RequestDecision::Rejected => RequestStatus::Rejected,
        }
    }
}

/// A chat request document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub id: Uuid,
    pub from_uid: Uuid,
    pub to_uid: Uuid,
    pub from_name: String,
    pub to_name: Option<String>,
    pub sport: Option<Sport>,
    pub message: String,
    pub status: RequestStatus,
    pub created_at: u64,
}

/// Live feed events for request subscriptions
#[derive(Debug, Clone)]
pub enum RequestEvent {
    Created(ChatRequest),
    Updated(ChatRequest),
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Cannot send a request to yourself")]
    SelfRequest,

    #[error("A pending request to this player already exists")]
    DuplicatePending,

    #[error("Request not found")]
    NotFound,

    #[error("Request was already resolved")]
    AlreadyResolved,

    #[error("Only the recipient may respond to a request")]
    NotRecipient,
}

/// The default greeting written when the sender does not supply one
pub fn default_message(to_name: Option<&str>, sport: Option<Sport>) -> String {
    let name = to_name.unwrap_or("player");
    match sport {
        Some(sport) => format!("Hi {}! Want to play {}?", name, sport_label(sport)),
        None => format!("Hi {}! Want to play today?", name),
    }
}

fn sport_label(sport: Sport) -> &'static str {
    match sport {
        Sport::Cricket => "cricket",
        Sport::Football => "football",
        Sport::Badminton => "badminton",
        Sport::Tennis => "tennis",
        Sport::Chess => "chess",
    }
}

/// In-memory chat request collection
#[derive(Clone)]
pub struct RequestStore {
    requests: Arc<DashMap<Uuid, ChatRequest>>,
    /// Serializes the duplicate-pending check against inserts
    write_lock: Arc<Mutex<()>>,
    events: Arc<Feed<RequestEvent>>,
    clock: Arc<MonotonicClock>,
}

impl Default for RequestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStore {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
            write_lock: Arc::new(Mutex::new(())),
            events: Arc::new(Feed::new(256, "requests")),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<ChatRequest> {
        self.requests.get(&id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Subscribe to the request event feed
    pub fn subscribe(&self) -> Subscription<RequestEvent> {
        self.events.subscribe()
    }

    /// Create a new pending request from `from_uid` to `to_uid`.
    pub fn send(
        &self,
        from_uid: Uuid,
        from_name: &str,
        to_uid: Uuid,
        to_name: Option<String>,
        sport: Option<Sport>,
        message: Option<String>,
    ) -> Result<ChatRequest, RequestError> {
        if from_uid == to_uid {
            return Err(RequestError::SelfRequest);
        }

        let _guard = self.write_lock.lock();

        let duplicate = self.requests.iter().any(|r| {
            r.from_uid == from_uid && r.to_uid == to_uid && r.status == RequestStatus::Pending
        });
        if duplicate {
            return Err(RequestError::DuplicatePending);
        }

        let request = ChatRequest {
            id: Uuid::new_v4(),
            from_uid,
            to_uid,
            from_name: from_name.to_string(),
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| default_message(to_name.as_deref(), sport)),
            to_name,
            sport,
            status: RequestStatus::Pending,
            created_at: self.clock.tick(),
        };

        self.requests.insert(request.id, request.clone());
        info!(request_id = %request.id, from = %from_uid, to = %to_uid, "Chat request sent");
        self.events.publish(RequestEvent::Created(request.clone()));
        Ok(request)
    }

    /// Resolve a pending request. Only the recipient may respond, and a request
    /// that already left `pending` cannot be touched again.
    pub fn respond(
        &self,
        id: Uuid,
        responder: Uuid,
        decision: RequestDecision,
    ) -> Result<ChatRequest, RequestError> {
        let _guard = self.write_lock.lock();

        let mut entry = self.requests.get_mut(&id).ok_or(RequestError::NotFound)?;
        if entry.to_uid != responder {
            return Err(RequestError::NotRecipient);
        }
        if entry.status != RequestStatus::Pending {
            return Err(RequestError::AlreadyResolved);
        }

        entry.status = decision.into();
        let updated = entry.clone();
        drop(entry);

        info!(request_id = %id, status = ?updated.status, "Chat request resolved");
        self.events.publish(RequestEvent::Updated(updated.clone()));
        Ok(updated)
    }

    /// Pending requests addressed to `to_uid`, oldest first.
    pub fn incoming_pending(&self, to_uid: Uuid) -> Vec<ChatRequest> {
        let mut list: Vec<ChatRequest> = self
            .requests
            .iter()
            .filter(|r| r.to_uid == to_uid && r.status == RequestStatus::Pending)
            .map(|r| r.clone())
            .collect();
        list.sort_by_key(|r| r.created_at);
        list
    }

    /// Target uids of requests sent by `from_uid` currently in `status`.
    pub fn targets_with_status(&self, from_uid: Uuid, status: RequestStatus) -> HashSet<Uuid> {
        self.requests
            .iter()
            .filter(|r| r.from_uid == from_uid && r.status == status)
            .map(|r| r.to_uid)
            .collect()
    }
}
