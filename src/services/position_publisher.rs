//! Publisher loop for one delivery
//!
//! Drains a delivery's channel and forwards every DriverMoved to the simulation
//! publisher, keyed by route id. The loop ends when the producer closes the
//! channel, on shutdown, or when no position arrives within the idle timeout.
//! The idle timeout only guards against a stalled producer; it is always longer
//! than the pacing delay.

use crate::domain::events::DriverMoved;
use crate::infra::metrics::Metrics;
use crate::infra::shutdown::wait_for_shutdown;
use crate::io::publisher::Publisher;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Why the publisher loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherExit {
    /// Producer closed the channel
    Completed,
    /// No position within the idle timeout
    IdleTimeout,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherReport {
    pub published: usize,
    pub failed: usize,
    pub exit: PublisherExit,
}

/// Forwards positions from one delivery channel to the simulation output
pub struct PositionPublisher {
    publisher: Arc<dyn Publisher>,
    idle_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl PositionPublisher {
    pub fn new(publisher: Arc<dyn Publisher>, idle_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self { publisher, idle_timeout, metrics }
    }

    /// Drain `positions` until completion, shutdown or idle timeout
    pub async fn run(
        &self,
        mut positions: mpsc::Receiver<DriverMoved>,
        mut shutdown: watch::Receiver<bool>,
    ) -> PublisherReport {
        let mut report = PublisherReport { published: 0, failed: 0, exit: PublisherExit::Completed };

        loop {
            tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut shutdown) => {
                    // Flush whatever the producer already handed over
                    while let Ok(event) = positions.try_recv() {
                        self.forward(&event, &mut report).await;
                    }
                    report.exit = PublisherExit::Shutdown;
                    return report;
                }
                next = tokio::time::timeout(self.idle_timeout, positions.recv()) => {
                    match next {
                        Ok(Some(event)) => self.forward(&event, &mut report).await,
                        Ok(None) => {
                            report.exit = PublisherExit::Completed;
                            return report;
                        }
                        Err(_) => {
                            self.metrics.record_idle_timeout();
                            report.exit = PublisherExit::IdleTimeout;
                            return report;
                        }
                    }
                }
            }
        }
    }

    /// Publish one position. Failures are counted, never fatal to the loop.
    async fn forward(&self, event: &DriverMoved, report: &mut PublisherReport) {
        let payload = match serde_json::to_vec(event) {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                warn!(route_id = %event.route_id, error = %e, "driver_moved_encode_failed");
                report.failed += 1;
                self.metrics.record_position_publish_failed();
                return;
            }
        };

        match self.publisher.publish(&event.route_id, payload).await {
            Ok(()) => {
                report.published += 1;
                self.metrics.record_position_published();
                debug!(
                    route_id = %event.route_id,
                    lat = %event.lat,
                    lng = %event.lng,
                    "driver_moved_published"
                );
            }
            Err(e) => {
                report.failed += 1;
                self.metrics.record_position_publish_failed();
                warn!(
                    route_id = %event.route_id,
                    destination = %self.publisher.destination(),
                    error = %e,
                    "driver_moved_publish_failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::route::Position;
    use crate::infra::shutdown::shutdown_channel;
    use crate::io::publisher::RecordingPublisher;

    fn moved(i: usize) -> DriverMoved {
        DriverMoved::new("r1", Position::new(i as f64, i as f64))
    }

    fn setup(idle_ms: u64) -> (Arc<RecordingPublisher>, PositionPublisher) {
        let recorder = Arc::new(RecordingPublisher::new("simulator"));
        let publisher =
            PositionPublisher::new(recorder.clone(), Duration::from_millis(idle_ms), Arc::new(Metrics::new()));
        (recorder, publisher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_when_channel_closes() {
        let (recorder, publisher) = setup(500);
        let (_stx, srx) = shutdown_channel();
        let (tx, rx) = mpsc::channel(4);
        for i in 0..3 {
            tx.send(moved(i)).await.unwrap();
        }
        drop(tx);

        let report = publisher.run(rx, srx).await;
        assert_eq!(report, PublisherReport { published: 3, failed: 0, exit: PublisherExit::Completed });

        let messages = recorder.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.key == "r1"));
        assert_eq!(messages[2].json()["lat"], 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_when_producer_stalls() {
        let (recorder, publisher) = setup(500);
        let (_stx, srx) = shutdown_channel();
        let (tx, rx) = mpsc::channel(4);
        tx.send(moved(0)).await.unwrap();

        // tx stays alive but never sends again
        let report = publisher.run(rx, srx).await;
        assert_eq!(report.exit, PublisherExit::IdleTimeout);
        assert_eq!(report.published, 1);
        assert_eq!(recorder.len(), 1);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_does_not_stop_loop() {
        let (recorder, publisher) = setup(500);
        let (_stx, srx) = shutdown_channel();
        let (tx, rx) = mpsc::channel(4);
        recorder.set_failing(true);
        tx.send(moved(0)).await.unwrap();

        let producer = tokio::spawn({
            let recorder = recorder.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                recorder.set_failing(false);
                tx.send(moved(1)).await.unwrap();
            }
        });

        let report = publisher.run(rx, srx).await;
        producer.await.unwrap();
        assert_eq!(report, PublisherReport { published: 1, failed: 1, exit: PublisherExit::Completed });
        assert_eq!(recorder.messages()[0].json()["lat"], 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_buffered_positions() {
        let (recorder, publisher) = setup(60_000);
        let (stx, srx) = shutdown_channel();
        let (tx, rx) = mpsc::channel(4);
        tx.send(moved(0)).await.unwrap();
        tx.send(moved(1)).await.unwrap();
        stx.send(true).unwrap();

        let report = publisher.run(rx, srx).await;
        assert_eq!(report.exit, PublisherExit::Shutdown);
        assert_eq!(recorder.len(), 2);
        drop(tx);
    }
}
