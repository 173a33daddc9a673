//! Unified event bus — trait for publishing domain events from any module.
//!
//! Modules accept an `Arc<dyn EventBus>` to publish auction outcomes and
//! lifecycle events to named topics. Publishing is fire-and-forget: no call
//! site may block on or fail because of a publish.

use std::sync::{Arc, Mutex};

/// Topic names shared between producers and out-of-process consumers.
pub mod topics {
    pub const BID_REQUESTS: &str = "bid-requests";
    pub const BID_RESPONSES: &str = "bid-responses";
    pub const AUCTION_RESULTS: &str = "auction-results";
    pub const IMPRESSIONS: &str = "impressions";
    pub const CLICKS: &str = "clicks";
    pub const CONVERSIONS: &str = "conversions";
    pub const CAMPAIGN_UPDATES: &str = "campaign-updates";
}

/// Trait for publishing events to a topic. Implementations route to NATS
/// subjects; errors are logged by the implementation, never surfaced.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &'static str, payload: serde_json::Value);
}

/// Serialize and publish in one call. Serialization failures are logged
/// and dropped, keeping the fire-and-forget contract.
pub fn publish_json<T: serde::Serialize>(bus: &dyn EventBus, topic: &'static str, event: &T) {
    match serde_json::to_value(event) {
        Ok(payload) => bus.publish(topic, payload),
        Err(e) => tracing::error!(error = %e, topic = topic, "Failed to serialize event"),
    }
}

/// No-op bus for tests and modules that don't need event emission.
pub struct NoOpBus;

impl EventBus for NoOpBus {
    fn publish(&self, _topic: &'static str, _payload: serde_json::Value) {}
}

/// In-memory bus that captures events for testing.
#[derive(Default)]
pub struct CaptureBus {
    events: Mutex<Vec<(&'static str, serde_json::Value)>>,
}

impl CaptureBus {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<(&'static str, serde_json::Value)> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_topic(&self, topic: &str) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|(t, _)| *t == topic)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventBus for CaptureBus {
    fn publish(&self, topic: &'static str, payload: serde_json::Value) {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .push((topic, payload));
    }
}

/// Convenience: create a no-op bus for modules that don't need one.
pub fn noop_bus() -> Arc<dyn EventBus> {
    Arc::new(NoOpBus)
}

/// Convenience: create a capture bus for tests.
pub fn capture_bus() -> Arc<CaptureBus> {
    Arc::new(CaptureBus::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_bus() {
        let bus = capture_bus();
        assert_eq!(bus.count(), 0);

        bus.publish(topics::BID_REQUESTS, serde_json::json!({"id": "req-1"}));
        bus.publish(topics::IMPRESSIONS, serde_json::json!({"id": "evt-1"}));

        assert_eq!(bus.count(), 2);
        assert_eq!(bus.count_topic(topics::BID_REQUESTS), 1);
        assert_eq!(bus.count_topic(topics::CLICKS), 0);

        let events = bus.events();
        assert_eq!(events[0].1["id"], "req-1");
    }

    #[test]
    fn test_noop_bus() {
        let bus = noop_bus();
        // Should not panic
        bus.publish(topics::AUCTION_RESULTS, serde_json::json!({}));
    }
}
