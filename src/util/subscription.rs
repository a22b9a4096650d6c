//! Live-subscription primitive shared by the stores and the presence channel.
//!
//! A `Subscription<T>` is a lazy stream of events for one query: callers pull
//! with [`Subscription::next`] and tear down exactly once with
//! [`Subscription::unsubscribe`] (or by dropping). Lag on a slow consumer skips
//! events with a warning rather than disconnecting.

use tokio::sync::broadcast;
use tracing::warn;

/// Receiving half of a live feed.
pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
    label: &'static str,
}

impl<T: Clone> Subscription<T> {
    pub fn new(rx: broadcast::Receiver<T>, label: &'static str) -> Self {
        Self { rx, label }
    }

    /// Wait for the next event. `None` means the publisher is gone and no
    /// further events will ever arrive.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(feed = self.label, skipped = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll, used by paths that drain after a known write.
    pub fn try_next(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(feed = self.label, skipped = n, "subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Explicit teardown. Consuming `self` makes double-unsubscribe unrepresentable.
    pub fn unsubscribe(self) {}
}

/// Publishing half: a thin wrapper so stores do not care whether anyone listens.
pub struct Feed<T> {
    tx: broadcast::Sender<T>,
    label: &'static str,
}

impl<T: Clone> Feed<T> {
    pub fn new(capacity: usize, label: &'static str) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, label }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription::new(self.tx.subscribe(), self.label)
    }

    /// Publish an event. A send error only means nobody is subscribed.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let feed: Feed<u32> = Feed::new(16, "test");
        let mut sub = feed.subscribe();
        for n in 0..5 {
            feed.publish(n);
        }
        for n in 0..5 {
            assert_eq!(sub.next().await, Some(n));
        }
    }

    #[tokio::test]
    async fn closed_feed_ends_subscription() {
        let feed: Feed<u32> = Feed::new(16, "test");
        let mut sub = feed.subscribe();
        feed.publish(7);
        drop(feed);
        assert_eq!(sub.next().await, Some(7));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let feed: Feed<u32> = Feed::new(4, "test");
        feed.publish(1);
        let mut sub = feed.subscribe();
        // Events published before subscribing are not replayed.
        assert_eq!(sub.try_next(), None);
    }
}
