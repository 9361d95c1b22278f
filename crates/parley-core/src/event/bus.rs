//! Broadcast event bus shared by the session, realtime and delivery layers.
//!
//! Built on `tokio::sync::broadcast`: every subscriber sees events in the
//! order they were published. Publishing with no active subscribers is a
//! no-op.

use tokio::sync::broadcast;

/// Multi-consumer event bus.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers over the same channel.
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: E) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: Clone> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::session::SessionEvent;

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::Renewed);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, SessionEvent::Renewed);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_events_in_order() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(SessionEvent::Renewed);
        bus.publish(SessionEvent::LoggedOut);

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.recv().await.unwrap(), SessionEvent::Renewed);
            assert_eq!(rx.recv().await.unwrap(), SessionEvent::LoggedOut);
        }
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus: EventBus<SessionEvent> = EventBus::new(16);
        bus.publish(SessionEvent::LoggedOut);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(SessionEvent::LoggedOut);

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::LoggedOut);
    }

    #[test]
    fn debug_impl() {
        let bus: EventBus<SessionEvent> = EventBus::new(16);
        let _rx = bus.subscribe();
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("receiver_count"));
    }
}
