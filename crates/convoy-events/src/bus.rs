//! Event bus for broadcasting platform events to subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use convoy_core::automation::PlatformEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast bus delivering every published event to all subscribers.
///
/// Events are delivered asynchronously and in publish order. A
/// subscriber that falls more than the channel capacity behind loses
/// the oldest events (logged, counted by the receiver).
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<PlatformEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with an explicit capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers the event reached. Zero receivers
    /// is not an error: engines may start before subscribers attach.
    pub fn publish(&self, event: PlatformEvent) -> usize {
        let event = Arc::new(event);
        trace!(tag = %event.tag, target = event.target, "Publishing event");

        if let Ok(count) = self.sender.send(Arc::clone(&event)) {
            debug!(tag = %event.tag, receiver_count = count, "Event published");
            count
        } else {
            trace!(tag = %event.tag, "No receivers for event");
            0
        }
    }

    /// Subscribe to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            lagged: 0,
        }
    }

    /// Current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of the bus.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<PlatformEvent>>,
    lagged: u64,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Skips over lag gaps (logging how many events were missed) and
    /// returns `None` only when the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<PlatformEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.lagged = self.lagged.saturating_add(count);
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Total events this receiver has missed to lag.
    #[must_use]
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::automation::EventTag;

    fn event(target: i64) -> PlatformEvent {
        PlatformEvent::new(
            EventTag::TicketCreated,
            target,
            serde_json::json!({"ticket": {"id": target}}),
        )
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(event(1));
        bus.publish(event(2));

        assert_eq!(rx.recv().await.unwrap().target, 1);
        assert_eq!(rx.recv().await.unwrap().target, 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_reports_zero() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(event(1)), 0);
    }

    #[tokio::test]
    async fn lagged_receiver_skips_and_counts() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish(event(i));
        }

        // The two newest events survive; the receiver records the gap.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.target, 3);
        assert_eq!(rx.lagged(), 3);
    }
}
