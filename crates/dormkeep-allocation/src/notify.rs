//! Change notification.
//!
//! After a mutation commits, the engine announces which topics changed.
//! The signal carries no payload and is not part of the commit: it can be
//! dropped (no subscribers, a lagging subscriber) without any effect on
//! stored state. Observers that miss one reconcile by querying again.

use dormkeep_protocol::Topic;
use tokio::sync::broadcast;

/// Receives "topic changed" signals from the engine.
pub trait Notifier: Send + Sync + 'static {
    /// Fire-and-forget. Must not block.
    fn publish(&self, topic: Topic);
}

/// Discards every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn publish(&self, _topic: Topic) {}
}

/// Fans signals out to any number of subscribers over a
/// `tokio::sync::broadcast` channel.
///
/// A subscriber that falls more than `capacity` signals behind gets
/// `RecvError::Lagged` and should treat everything as changed.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Topic>,
}

impl BroadcastNotifier {
    /// # Panics
    /// Panics if `capacity` is 0 (see [`EngineConfig::validated`](crate::EngineConfig::validated)).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Starts receiving signals published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Topic> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, topic: Topic) {
        // Err only means nobody is listening right now.
        if self.sender.send(topic).is_err() {
            tracing::trace!(%topic, "change signal dropped (no subscribers)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let notifier = BroadcastNotifier::new(4);
        notifier.publish(Topic::Rooms);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_topics_in_order() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.publish(Topic::Students);
        notifier.publish(Topic::Rooms);

        assert_eq!(rx.recv().await.unwrap(), Topic::Students);
        assert_eq!(rx.recv().await.unwrap(), Topic::Rooms);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told_it_lagged() {
        let notifier = BroadcastNotifier::new(1);
        let mut rx = notifier.subscribe();

        notifier.publish(Topic::Rooms);
        notifier.publish(Topic::Students);

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap(), Topic::Students);
    }
}
