//! Inbound message pool - one task per message, bounded by an admission limit
//!
//! The ingress loop calls `submit` for every payload. Submission waits for a
//! semaphore permit, then spawns the handling task, which holds the permit until
//! the router returns. Errors are logged, counted and the message is dropped.
//!
//! On shutdown the pool is drained: once every permit is back, no handler is
//! running and the semaphore is closed.

use crate::infra::metrics::Metrics;
use crate::infra::shutdown::wait_for_shutdown;
use crate::services::event_router::EventRouter;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cloneable handle to the message pool
#[derive(Clone)]
pub struct MessagePool {
    router: Arc<EventRouter>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    metrics: Arc<Metrics>,
}

impl MessagePool {
    pub fn new(router: Arc<EventRouter>, max_in_flight: usize, metrics: Arc<Metrics>) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self { router, permits: Arc::new(Semaphore::new(max_in_flight)), max_in_flight, metrics }
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Hand a payload to a new task, waiting for a free slot first
    pub async fn submit(&self, payload: Bytes) -> Option<JoinHandle<()>> {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("message_pool_closed");
                return None;
            }
        };

        self.metrics.record_message_received();
        let router = self.router.clone();
        let metrics = self.metrics.clone();

        Some(tokio::spawn(async move {
            let _permit = permit;
            let start = Instant::now();
            let result = router.handle(payload).await;
            let latency_us = start.elapsed().as_micros() as u64;

            match &result {
                Ok(outcome) => {
                    debug!(outcome = ?outcome, latency_us = %latency_us, "message_handled");
                    metrics.record_message_done(Ok(()), latency_us);
                }
                Err(e) => {
                    warn!(kind = %e.kind(), error = %e, latency_us = %latency_us, "message_dropped");
                    metrics.record_message_done(Err(e), latency_us);
                }
            }
        }))
    }

    /// Like `submit`, but gives up if shutdown is signalled while waiting for a slot
    pub async fn submit_or_shutdown(
        &self,
        payload: Bytes,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let bytes = payload.len();
        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => {
                debug!(bytes = %bytes, "message_pool_submit_abandoned");
                None
            }
            handle = self.submit(payload) => handle,
        }
    }

    /// Stop admitting new messages
    pub fn close(&self) {
        self.permits.close();
    }

    /// Wait for in-flight handlers to finish, up to `timeout`, then close
    ///
    /// Returns true if every handler finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let permits = self.max_in_flight as u32;
        let drained = matches!(
            tokio::time::timeout(timeout, self.permits.acquire_many(permits)).await,
            Ok(Ok(_))
        );
        self.close();

        if drained {
            info!("message_pool_drained");
        } else {
            warn!(
                in_flight = %self.max_in_flight.saturating_sub(self.available()),
                timeout_ms = %timeout.as_millis(),
                "message_pool_drain_timeout"
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::shutdown::shutdown_channel;
    use crate::io::publisher::RecordingPublisher;
    use crate::io::route_store::MemoryRouteStore;
    use crate::services::deliveries::{DeliveryLauncher, DeliveryRegistry};
    use crate::services::position_publisher::PositionPublisher;
    use crate::services::route_coordinator::RouteCoordinator;
    use crate::services::simulator::DeliverySimulator;
    use crate::error::PublishError;
    use crate::io::publisher::Publisher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(max_in_flight: usize) -> (MessagePool, Arc<Metrics>, Arc<RecordingPublisher>) {
        let freight = Arc::new(RecordingPublisher::new("freight"));
        let (pool, metrics) = pool_with(max_in_flight, freight.clone());
        (pool, metrics, freight)
    }

    fn pool_with(max_in_flight: usize, freight: Arc<dyn Publisher>) -> (MessagePool, Arc<Metrics>) {
        let (_tx, rx) = shutdown_channel();
        let metrics = Arc::new(Metrics::new());
        let launcher = DeliveryLauncher::new(
            DeliverySimulator::new(Duration::from_millis(10), 1, metrics.clone()),
            PositionPublisher::new(
                Arc::new(RecordingPublisher::new("simulator")),
                Duration::from_millis(50),
                metrics.clone(),
            ),
            Arc::new(DeliveryRegistry::new()),
            metrics.clone(),
            rx,
        );
        let router = EventRouter::new(
            RouteCoordinator::new(Arc::new(MemoryRouteStore::new())),
            freight,
            launcher,
            metrics.clone(),
            false,
        );
        (MessagePool::new(Arc::new(router), max_in_flight, metrics.clone()), metrics)
    }

    /// Freight publisher that blocks every publish until the test hands out a permit
    struct GatedPublisher {
        gate: Semaphore,
        published: AtomicUsize,
    }

    impl GatedPublisher {
        fn new() -> Arc<Self> {
            Arc::new(Self { gate: Semaphore::new(0), published: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl Publisher for GatedPublisher {
        async fn publish(&self, _key: &str, _payload: Bytes) -> Result<(), PublishError> {
            self.gate.acquire().await.map_err(|e| PublishError::new("gated", e))?.forget();
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn destination(&self) -> &str {
            "gated"
        }
    }

    fn route_created(id: &str) -> Bytes {
        Bytes::from(format!(r#"{{"event":"RouteCreated","id":"{id}","distance":7}}"#))
    }

    #[tokio::test]
    async fn test_handles_and_counts_messages() {
        let (pool, metrics, freight) = pool(4);
        let mut handles = Vec::new();
        for i in 0..10 {
            let payload = format!(r#"{{"event":"RouteCreated","id":"r{}","distance":{}}}"#, i, i);
            handles.push(pool.submit(Bytes::from(payload)).await.unwrap());
        }
        handles.push(pool.submit(Bytes::from_static(b"garbage")).await.unwrap());
        for h in handles {
            h.await.unwrap();
        }

        let summary = metrics.report(0);
        assert_eq!(summary.messages_received, 11);
        assert_eq!(summary.messages_handled, 10);
        assert_eq!(summary.failures[0], 1);
        assert_eq!(summary.in_flight, 0);
        assert_eq!(freight.len(), 10);
        assert_eq!(pool.available(), 4);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_submissions() {
        let (pool, metrics, _) = pool(1);
        pool.close();
        assert!(pool.submit(Bytes::from_static(b"{}")).await.is_none());
        assert_eq!(metrics.report(0).messages_received, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_blocks_submission_until_slot_frees() {
        let gated = GatedPublisher::new();
        let (pool, metrics) = pool_with(2, gated.clone());

        let first = pool.submit(route_created("r1")).await.unwrap();
        let second = pool.submit(route_created("r2")).await.unwrap();
        assert_eq!(pool.available(), 0);

        let third = pool.submit(route_created("r3"));
        tokio::pin!(third);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut third).await.is_err());
        assert_eq!(metrics.snapshot(0).messages_received, 2);

        gated.gate.add_permits(1);
        let third = third.await.unwrap();
        gated.gate.add_permits(2);
        for handle in [first, second, third] {
            handle.await.unwrap();
        }

        assert_eq!(gated.published.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot(0).messages_handled, 3);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_blocked_submission() {
        let gated = GatedPublisher::new();
        let (pool, metrics) = pool_with(1, gated.clone());
        let (tx, mut rx) = shutdown_channel();

        let _busy = pool.submit(route_created("r1")).await.unwrap();

        let blocked = tokio::spawn({
            let pool = pool.clone();
            async move { pool.submit_or_shutdown(route_created("r2"), &mut rx).await.is_none() }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        tx.send(true).unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(50), blocked).await.unwrap().unwrap();
        assert!(abandoned);
        assert_eq!(metrics.snapshot(0).messages_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight_handlers() {
        let gated = GatedPublisher::new();
        let (pool, metrics) = pool_with(2, gated.clone());
        let handle = pool.submit(route_created("r1")).await.unwrap();

        let drain = tokio::spawn({
            let pool = pool.clone();
            async move { pool.drain(Duration::from_secs(5)).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!drain.is_finished());

        gated.gate.add_permits(1);
        handle.await.unwrap();
        assert!(drain.await.unwrap());
        assert_eq!(metrics.snapshot(0).messages_handled, 1);
        assert!(pool.submit(route_created("r2")).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_timeout() {
        let gated = GatedPublisher::new();
        let (pool, _) = pool_with(1, gated);
        let _stuck = pool.submit(route_created("r1")).await.unwrap();

        assert!(!pool.drain(Duration::from_millis(200)).await);
        assert!(pool.submit(route_created("r2")).await.is_none());
    }
}
