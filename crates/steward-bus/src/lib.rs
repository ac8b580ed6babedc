//! In-process topic pub/sub.
//!
//! One broadcast channel per topic. Publishing never blocks: a subscriber
//! that falls behind loses its own oldest events (broadcast lag semantics)
//! while everyone else keeps a full FIFO view. Topics in use:
//! `session.state`, `session.started`, `session.ended`,
//! `worker.output_updated`, `worker.completed`, `worker.failed`,
//! `priority.*`, `email.*`, `mission.completed`, `duty.completed`.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Buffered events per subscriber before the oldest get dropped.
const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: String,
}

pub struct EventBus {
    topics: DashMap<String, broadcast::Sender<BusEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusEvent> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish to all current subscribers of `topic`. Events published with
    /// no subscribers are dropped silently.
    pub fn publish(&self, topic: &str, payload: serde_json::Value) {
        let event = BusEvent {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now().to_rfc3339(),
        };
        let receivers = self.sender(topic).send(event).unwrap_or(0);
        trace!(topic, receivers, "event published");
    }

    /// Subscribe to a topic. Each subscriber gets an independent bounded
    /// buffer; overflow drops that subscriber's oldest events only.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        Subscription {
            rx: self.sender(topic).subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<BusEvent>,
}

impl Subscription {
    /// Next event, transparently skipping over lag gaps. Returns `None` once
    /// the bus side is gone.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "subscriber lagged, oldest events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant for polling consumers.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_to_multiple_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe("mission.completed");
        let mut b = bus.subscribe("mission.completed");

        bus.publish("mission.completed", serde_json::json!({"slug": "inbox-sweep"}));

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.payload["slug"], "inbox-sweep");
        assert_eq!(eb.payload["slug"], "inbox-sweep");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new();
        let mut duty = bus.subscribe("duty.completed");

        bus.publish("mission.completed", serde_json::json!({}));
        assert!(duty.try_recv().is_none());

        bus.publish("duty.completed", serde_json::json!({"slug": "morning-prep"}));
        assert_eq!(
            duty.recv().await.unwrap().payload["slug"],
            "morning-prep"
        );
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish("session.state", serde_json::json!({"state": "active"}));
    }

    #[tokio::test]
    async fn slow_subscriber_loses_only_oldest() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("worker.output_updated");

        // Overflow the buffer; the earliest events fall off for this
        // subscriber, later ones survive in order.
        for i in 0..(TOPIC_CAPACITY + 50) {
            bus.publish("worker.output_updated", serde_json::json!({ "seq": i }));
        }

        let first = sub.recv().await.unwrap();
        let first_seq = first.payload["seq"].as_u64().unwrap();
        assert!(first_seq >= 50);

        let second = sub.recv().await.unwrap();
        assert_eq!(second.payload["seq"].as_u64().unwrap(), first_seq + 1);
    }
}
