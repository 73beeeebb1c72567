//! Delivery simulator - paced DriverMoved producer
//!
//! Each started delivery gets its own producer task and its own channel. The
//! producer sleeps for the pacing delay, emits one position, and repeats until
//! the route's directions are exhausted. Dropping the sender at the end is the
//! completion signal for the consumer.

use crate::domain::events::DriverMoved;
use crate::domain::route::Route;
use crate::infra::metrics::Metrics;
use crate::infra::shutdown::wait_for_shutdown;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Why a producer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// Every waypoint was emitted
    Completed,
    /// The consumer went away before the route was finished
    ConsumerGone,
    /// Process shutdown interrupted the route
    Shutdown,
}

/// Result of one producer run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    pub produced: usize,
    pub exit: ProducerExit,
}

/// A running simulation: the consumer end of its channel plus the producer task
pub struct SimulationHandle {
    pub positions: mpsc::Receiver<DriverMoved>,
    pub producer: JoinHandle<ProducerReport>,
}

/// Spawns paced producers
#[derive(Clone)]
pub struct DeliverySimulator {
    pacing: Duration,
    buffer: usize,
    metrics: Arc<Metrics>,
}

impl DeliverySimulator {
    pub fn new(pacing: Duration, buffer: usize, metrics: Arc<Metrics>) -> Self {
        Self { pacing, buffer: buffer.max(1), metrics }
    }

    /// Start simulating `route` on a new task
    ///
    /// The sequence cannot be restarted; a new call starts a fresh simulation
    /// with its own channel.
    pub fn start(&self, route: Route, shutdown: watch::Receiver<bool>) -> SimulationHandle {
        let (tx, rx) = mpsc::channel(self.buffer);
        let pacing = self.pacing;
        let metrics = self.metrics.clone();
        let producer = tokio::spawn(produce(route, tx, pacing, metrics, shutdown));
        SimulationHandle { positions: rx, producer }
    }
}

async fn produce(
    route: Route,
    tx: mpsc::Sender<DriverMoved>,
    pacing: Duration,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> ProducerReport {
    let mut produced = 0;

    for position in &route.directions {
        tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut shutdown) => {
                debug!(route_id = %route.id, produced = %produced, "simulation_interrupted");
                return ProducerReport { produced, exit: ProducerExit::Shutdown };
            }
            _ = tokio::time::sleep(pacing) => {}
        }

        if tx.send(DriverMoved::new(route.id.clone(), *position)).await.is_err() {
            debug!(route_id = %route.id, produced = %produced, "simulation_consumer_gone");
            return ProducerReport { produced, exit: ProducerExit::ConsumerGone };
        }
        produced += 1;
        metrics.record_position_produced();
    }

    debug!(route_id = %route.id, produced = %produced, "simulation_completed");
    ProducerReport { produced, exit: ProducerExit::Completed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::route::Position;
    use crate::infra::shutdown::shutdown_channel;
    use tokio::time::Instant;

    fn simulator(pacing_ms: u64) -> DeliverySimulator {
        DeliverySimulator::new(Duration::from_millis(pacing_ms), 1, Arc::new(Metrics::new()))
    }

    fn route(n: usize) -> Route {
        let directions = (0..n).map(|i| Position::new(i as f64, -(i as f64))).collect();
        Route::new("r1", 10, directions)
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_every_waypoint_in_order_then_closes() {
        let (_tx, rx) = shutdown_channel();
        let mut sim = simulator(1000).start(route(3), rx);

        let mut received = Vec::new();
        while let Some(event) = sim.positions.recv().await {
            received.push(event);
        }

        assert_eq!(received.len(), 3);
        for (i, event) in received.iter().enumerate() {
            assert_eq!(event.route_id, "r1");
            assert_eq!(event.lat, i as f64);
            assert_eq!(event.lng, -(i as f64));
        }
        let report = sim.producer.await.unwrap();
        assert_eq!(report, ProducerReport { produced: 3, exit: ProducerExit::Completed });
    }

    #[tokio::test(start_paused = true)]
    async fn test_paces_emissions() {
        let (_tx, rx) = shutdown_channel();
        let start = Instant::now();
        let mut sim = simulator(1000).start(route(2), rx);

        sim.positions.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1000));
        sim.positions.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert!(sim.positions.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_route_completes_immediately() {
        let (_tx, rx) = shutdown_channel();
        let mut sim = simulator(1000).start(route(0), rx);
        assert!(sim.positions.recv().await.is_none());
        assert_eq!(sim.producer.await.unwrap().produced, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_consumer_dropped() {
        let (_tx, rx) = shutdown_channel();
        let mut sim = simulator(100).start(route(5), rx);
        sim.positions.recv().await.unwrap();
        drop(sim.positions);

        let report = sim.producer.await.unwrap();
        assert_eq!(report.exit, ProducerExit::ConsumerGone);
        assert!(report.produced < 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let (tx, rx) = shutdown_channel();
        let mut sim = simulator(1000).start(route(10), rx);
        sim.positions.recv().await.unwrap();
        tx.send(true).unwrap();

        let report = sim.producer.await.unwrap();
        assert_eq!(report.exit, ProducerExit::Shutdown);
        assert_eq!(report.produced, 1);
    }
}
