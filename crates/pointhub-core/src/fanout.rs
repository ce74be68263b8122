//! Update fan-out.
//!
//! The pump drains the store's change events and pushes each one to every
//! connection subscribed to a prefix of its point ID. The event is encoded
//! once and the same buffer is shared by every delivery.
//!
//! Delivery only ever enqueues: a full queue overwrites its oldest entry
//! (see [`crate::connection`]), so a slow client costs itself messages and
//! never holds up the pump, the store or other clients.

use crate::point::ChangeEvent;
use crate::registry::SubscriptionRegistry;
use pointhub_protocol::{encode, ServerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Fan-out counters.
#[derive(Debug, Default)]
pub struct FanoutStats {
    events: AtomicU64,
    deliveries: AtomicU64,
    unmatched: AtomicU64,
}

impl FanoutStats {
    /// Change events processed.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Messages enqueued to connections.
    #[must_use]
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Events no connection was subscribed to.
    #[must_use]
    pub fn unmatched(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }
}

/// Routes change events to subscribed connections.
pub struct FanoutPump {
    registry: Arc<SubscriptionRegistry>,
    stats: Arc<FanoutStats>,
}

impl FanoutPump {
    /// Create a pump over `registry`.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            stats: Arc::new(FanoutStats::default()),
        }
    }

    /// Shared handle to the pump's counters.
    #[must_use]
    pub fn stats(&self) -> Arc<FanoutStats> {
        Arc::clone(&self.stats)
    }

    /// Deliver one event. Returns the number of connections it was queued to.
    pub fn dispatch(&self, event: &ChangeEvent) -> usize {
        self.stats.events.fetch_add(1, Ordering::Relaxed);

        let targets = self.registry.subscribers_for(&event.id);
        if targets.is_empty() {
            self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
            trace!(point = %event.id, "No subscribers");
            return 0;
        }

        let message: Arc<str> = match encode(&ServerEvent::from(event)) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!(point = %event.id, error = %e, "Failed to encode update");
                return 0;
            }
        };

        let delivered = targets
            .iter()
            .filter(|outbound| outbound.deliver(Arc::clone(&message)))
            .count();
        self.stats
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);

        trace!(
            point = %event.id,
            version = event.version,
            recipients = delivered,
            "Update fanned out"
        );
        delivered
    }

    /// Run the pump on its own task until the event stream ends.
    pub fn spawn(self, mut events: mpsc::UnboundedReceiver<ChangeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.dispatch(&event);
            }
            debug!("Change event stream closed, fan-out stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, Delivery};
    use crate::registry::RegistryConfig;
    use pointhub_protocol::{decode, PointValue};

    fn event(id: &str, value: i64, version: u64) -> ChangeEvent {
        ChangeEvent {
            id: id.to_string(),
            value: PointValue::Int(value),
            timestamp: version * 10,
            driver: "sim".to_string(),
            device: None,
            version,
        }
    }

    fn message(delivery: Option<Delivery>) -> ServerEvent {
        match delivery {
            Some(Delivery::Message(text)) => decode(&text).unwrap(),
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[test]
    fn test_matching_subscriber_gets_exactly_one() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let c1 = ConnectionId::new("c1");
        let mut rx = registry.open(c1.clone()).unwrap();
        registry.subscribe(&c1, "test.").unwrap();
        registry.subscribe(&c1, "test").unwrap();

        let pump = FanoutPump::new(Arc::clone(&registry));
        assert_eq!(pump.dispatch(&event("test.point1", 1, 1)), 1);
        assert_eq!(pump.dispatch(&event("other.point1", 1, 1)), 0);

        assert_eq!(message(rx.try_recv()).point_id(), Some("test.point1"));
        assert_eq!(rx.try_recv(), None);

        let stats = pump.stats();
        assert_eq!(stats.events(), 2);
        assert_eq!(stats.deliveries(), 1);
        assert_eq!(stats.unmatched(), 1);
    }

    #[test]
    fn test_closed_connection_gets_nothing() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let c1 = ConnectionId::new("c1");
        let _rx = registry.open(c1.clone()).unwrap();
        registry.subscribe(&c1, "a.").unwrap();
        registry.on_connection_closed(&c1);

        let pump = FanoutPump::new(registry);
        assert_eq!(pump.dispatch(&event("a.b", 1, 1)), 0);
    }

    #[test]
    fn test_slow_consumer_drops_oldest_without_reordering() {
        let registry = Arc::new(SubscriptionRegistry::with_config(RegistryConfig {
            outbound_capacity: 4,
            ..RegistryConfig::default()
        }));
        let slow = ConnectionId::new("slow");
        let fast = ConnectionId::new("fast");
        let mut slow_rx = registry.open(slow.clone()).unwrap();
        let mut fast_rx = registry.open(fast.clone()).unwrap();
        registry.subscribe(&slow, "a.").unwrap();
        registry.subscribe(&fast, "a.").unwrap();

        let pump = FanoutPump::new(registry);
        for version in 1..=10 {
            pump.dispatch(&event("a.b", version as i64, version));
            // The fast client keeps up.
            assert!(matches!(fast_rx.try_recv(), Some(Delivery::Message(_))));
        }

        assert_eq!(slow_rx.try_recv(), Some(Delivery::Lagged(6)));
        let versions: Vec<u64> = std::iter::from_fn(|| slow_rx.try_recv())
            .map(|d| match message(Some(d)) {
                ServerEvent::PointUpdate { version, .. } => version,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(versions, vec![7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_spawned_pump_drains_events() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let c1 = ConnectionId::new("c1");
        let mut rx = registry.open(c1.clone()).unwrap();
        registry.subscribe(&c1, "").unwrap();

        let (tx, events) = mpsc::unbounded_channel();
        let handle = FanoutPump::new(registry).spawn(events);
        tx.send(event("x.y", 5, 1)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(message(rx.recv().await).point_id(), Some("x.y"));
    }
}
