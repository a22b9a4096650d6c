//! User notification service
//!
//! Replaces the original clients' process-global toast registry with an
//! explicit service handed out through `AppState`. Handlers publish notices
//! addressed to a uid; each WebSocket session forwards its own user's notices.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::util::subscription::{Feed, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Info,
    Error,
}

/// A user-visible notice
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub user_id: Uuid,
    pub kind: NoticeKind,
    pub text: String,
}

#[derive(Clone)]
pub struct Notifier {
    feed: Arc<Feed<Notice>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            feed: Arc::new(Feed::new(256, "notices")),
        }
    }

    pub fn info(&self, user_id: Uuid, text: impl Into<String>) {
        self.feed.publish(Notice {
            user_id,
            kind: NoticeKind::Info,
            text: text.into(),
        });
    }

    pub fn error(&self, user_id: Uuid, text: impl Into<String>) {
        self.feed.publish(Notice {
            user_id,
            kind: NoticeKind::Error,
            text: text.into(),
        });
    }

    /// Subscribe to the full notice stream; sessions filter to their own uid.
    pub fn subscribe(&self) -> Subscription<Notice> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notices_carry_their_target_and_kind() {
        let notifier = Notifier::new();
        let mut sub = notifier.subscribe();
        let uid = Uuid::new_v4();

        notifier.info(uid, "Request accepted!");
        notifier.error(uid, "Failed to update request.");

        let first = sub.next().await.unwrap();
        assert_eq!(first.user_id, uid);
        assert_eq!(first.kind, NoticeKind::Info);
        let second = sub.next().await.unwrap();
        assert_eq!(second.kind, NoticeKind::Error);
    }
}
