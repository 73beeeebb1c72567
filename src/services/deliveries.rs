//! Delivery lifecycle - launches simulations and tracks the ones in flight
//!
//! Every DeliveryStarted gets a fresh delivery id, its own channel, a producer
//! task and a publisher loop. A supervisor task waits for both and removes the
//! delivery from the registry. Nothing is shared between deliveries except the
//! outbound publisher.

use crate::domain::route::Route;
use crate::infra::metrics::Metrics;
use crate::services::position_publisher::{PositionPublisher, PublisherExit, PublisherReport};
use crate::services::simulator::{DeliverySimulator, ProducerExit, ProducerReport};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{info, warn};
use uuid::Uuid;

/// Identifier of one running delivery (UUIDv7, time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry entry for a running delivery
#[derive(Debug, Clone)]
pub struct ActiveDelivery {
    pub route_id: String,
    pub started_at: Instant,
}

/// Running deliveries keyed by delivery id
#[derive(Default)]
pub struct DeliveryRegistry {
    active: Mutex<FxHashMap<DeliveryId, ActiveDelivery>>,
    drained: Notify,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: DeliveryId, delivery: ActiveDelivery) {
        self.active.lock().insert(id, delivery);
    }

    fn remove(&self, id: &DeliveryId) -> Option<ActiveDelivery> {
        let mut active = self.active.lock();
        let removed = active.remove(id);
        if active.is_empty() {
            self.drained.notify_waiters();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }

    /// Route ids with a delivery in flight (a route may appear more than once)
    pub fn active_routes(&self) -> Vec<String> {
        self.active.lock().values().map(|d| d.route_id.clone()).collect()
    }

    /// Wait until no delivery is running, up to `timeout`. Returns true if drained.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.drained.notified();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Final outcome of one delivery, logged by the supervisor
#[derive(Debug, Clone, Copy)]
pub struct DeliveryReport {
    pub producer: ProducerReport,
    pub publisher: PublisherReport,
}

/// Starts producer/publisher pairs for hydrated routes
pub struct DeliveryLauncher {
    simulator: DeliverySimulator,
    positions: Arc<PositionPublisher>,
    registry: Arc<DeliveryRegistry>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
}

impl DeliveryLauncher {
    pub fn new(
        simulator: DeliverySimulator,
        positions: PositionPublisher,
        registry: Arc<DeliveryRegistry>,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { simulator, positions: Arc::new(positions), registry, metrics, shutdown }
    }

    pub fn registry(&self) -> &Arc<DeliveryRegistry> {
        &self.registry
    }

    /// Launch a delivery for `route` and return immediately
    ///
    /// The returned handle resolves once the producer and the publisher loop have
    /// both finished. Callers that fire and forget can drop it.
    pub fn launch(&self, route: Route) -> (DeliveryId, tokio::task::JoinHandle<DeliveryReport>) {
        let id = DeliveryId::new();
        let route_id = route.id.clone();
        let waypoints = route.waypoints();

        self.registry.insert(
            id,
            ActiveDelivery { route_id: route_id.clone(), started_at: Instant::now() },
        );
        self.metrics.record_delivery_started();
        info!(delivery_id = %id, route_id = %route_id, waypoints = %waypoints, "delivery_started");

        let sim = self.simulator.start(route, self.shutdown.clone());
        let positions = self.positions.clone();
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let publisher = positions.run(sim.positions, shutdown).await;
            // Receiver is gone now, so a still-running producer stops at its next send
            let producer = match sim.producer.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(delivery_id = %id, route_id = %route_id, error = %e, "delivery_producer_panicked");
                    ProducerReport { produced: 0, exit: ProducerExit::ConsumerGone }
                }
            };

            let elapsed_ms = registry.remove(&id).map(|d| d.started_at.elapsed().as_millis() as u64);
            metrics.record_delivery_finished();

            if publisher.exit == PublisherExit::IdleTimeout {
                warn!(
                    delivery_id = %id,
                    route_id = %route_id,
                    produced = %producer.produced,
                    published = %publisher.published,
                    "delivery_stalled"
                );
            }
            info!(
                delivery_id = %id,
                route_id = %route_id,
                produced = %producer.produced,
                published = %publisher.published,
                failed = %publisher.failed,
                producer_exit = ?producer.exit,
                publisher_exit = ?publisher.exit,
                elapsed_ms = ?elapsed_ms,
                "delivery_finished"
            );

            DeliveryReport { producer, publisher }
        });

        (id, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::route::Position;
    use crate::infra::shutdown::shutdown_channel;
    use crate::io::publisher::RecordingPublisher;

    fn launcher(
        recorder: Arc<RecordingPublisher>,
        shutdown: watch::Receiver<bool>,
    ) -> DeliveryLauncher {
        let metrics = Arc::new(Metrics::new());
        let simulator = DeliverySimulator::new(Duration::from_millis(1000), 1, metrics.clone());
        let positions = PositionPublisher::new(recorder, Duration::from_millis(1500), metrics.clone());
        DeliveryLauncher::new(simulator, positions, Arc::new(DeliveryRegistry::new()), metrics, shutdown)
    }

    fn route(id: &str, points: &[(f64, f64)]) -> Route {
        Route::new(id, 1, points.iter().map(|&(lat, lng)| Position::new(lat, lng)).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_publishes_all_positions_and_unregisters() {
        let recorder = Arc::new(RecordingPublisher::new("simulator"));
        let (_tx, rx) = shutdown_channel();
        let launcher = launcher(recorder.clone(), rx);

        let (_, handle) = launcher.launch(route("r1", &[(1.0, 2.0), (3.0, 4.0)]));
        assert_eq!(launcher.registry().active_routes(), vec!["r1".to_string()]);

        let report = handle.await.unwrap();
        assert_eq!(report.producer.exit, ProducerExit::Completed);
        assert_eq!(report.publisher.exit, PublisherExit::Completed);
        assert_eq!(report.publisher.published, 2);
        assert!(launcher.registry().is_empty());

        let lats: Vec<f64> = recorder.messages().iter().map(|m| m.json()["lat"].as_f64().unwrap()).collect();
        assert_eq!(lats, vec![1.0, 3.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_deliveries_stay_separate() {
        let recorder = Arc::new(RecordingPublisher::new("simulator"));
        let (_tx, rx) = shutdown_channel();
        let launcher = launcher(recorder.clone(), rx);

        let (a, ha) = launcher.launch(route("a", &[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]));
        let (b, hb) = launcher.launch(route("b", &[(10.0, 10.0), (20.0, 20.0)]));
        assert_ne!(a, b);
        assert_eq!(launcher.registry().len(), 2);

        assert_eq!(ha.await.unwrap().publisher.published, 3);
        assert_eq!(hb.await.unwrap().publisher.published, 2);

        let messages = recorder.messages();
        let for_route = |id: &str| -> Vec<f64> {
            messages
                .iter()
                .filter(|m| m.key == id)
                .map(|m| m.json()["lat"].as_f64().unwrap())
                .collect()
        };
        assert_eq!(for_route("a"), vec![1.0, 2.0, 3.0]);
        assert_eq!(for_route("b"), vec![10.0, 20.0]);
        assert!(launcher.registry().wait_drained(Duration::from_millis(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_registry() {
        let recorder = Arc::new(RecordingPublisher::new("simulator"));
        let (tx, rx) = shutdown_channel();
        let launcher = launcher(recorder.clone(), rx);

        let (_, handle) = launcher.launch(route("r1", &[(0.0, 0.0); 100]));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        tx.send(true).unwrap();

        assert!(launcher.registry().wait_drained(Duration::from_secs(1)).await);
        let report = handle.await.unwrap();
        assert_eq!(report.publisher.exit, PublisherExit::Shutdown);
        assert_eq!(report.producer.exit, ProducerExit::Shutdown);
        assert_eq!(recorder.len(), 2);
    }
}
