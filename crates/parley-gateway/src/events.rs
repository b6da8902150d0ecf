//! Event bus - broadcast router events to all connected WebSocket clients

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{EventSink, OutboundEvent};
use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::GatewayEvent;

/// Broadcast event bus for the gateway
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GatewayEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe to events (each WebSocket connection gets its own receiver)
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event to all connected clients
    pub fn broadcast(&self, event: GatewayEvent) {
        let receivers = self.sender.receiver_count();
        if receivers > 0 {
            debug!(
                "Broadcasting event '{}' to {} receivers",
                event.kind(),
                receivers
            );
            // No receivers is fine
            let _ = self.sender.send(event);
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(&self, event: OutboundEvent) {
        self.broadcast(GatewayEvent::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_broadcast() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(OutboundEvent::notice("hello")).await;

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event, OutboundEvent::notice("hello"));
        assert_eq!(e2.kind(), "system_notice");
    }

    #[tokio::test]
    async fn test_event_bus_no_receivers() {
        let bus = EventBus::new(16);
        bus.publish(OutboundEvent::error("nobody listening")).await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_bus_subscriber_count() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        let rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_lagging_receiver_skips_events() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..4 {
            bus.publish(OutboundEvent::notice(format!("n{}", i))).await;
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        assert_eq!(rx.recv().await.unwrap().event, OutboundEvent::notice("n2"));
    }
}
