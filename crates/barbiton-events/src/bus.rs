#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::Event;

/// Shared event bus.
///
/// Components receive a cloned `EventBus` and publish directly.
/// `publish()` is sync and safe to call from the run-loop or reader threads.
/// Events published with no subscribers are dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all subscribers.
    ///
    /// Accepts sub-enum values directly: `bus.publish(AssetEvent::Closed)`.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    /// Subscribe to all future events.
    ///
    /// Slow subscribers receive `RecvError::Lagged(n)` instead of blocking producers.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssetEvent, NetEvent};

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(AssetEvent::Closed);
    }

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(AssetEvent::ChunkReady { idx: 3, len: 42 });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            Event::Asset(AssetEvent::ChunkReady { idx: 3, len: 42 })
        );
    }

    #[tokio::test]
    async fn sub_enums_convert() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(NetEvent::KeyRejected { seq: 9 });
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::Net(NetEvent::KeyRejected { seq: 9 })
        ));
    }

    #[tokio::test]
    async fn lagged_subscriber_gets_error() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for idx in 0..10 {
            bus.publish(AssetEvent::ChunkEvicted { idx });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn clone_shares_channel() {
        let bus1 = EventBus::new(16);
        let bus2 = bus1.clone();
        let mut rx = bus1.subscribe();
        bus2.publish(AssetEvent::Closed);
        assert!(rx.try_recv().is_ok());
    }
}
