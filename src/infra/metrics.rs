//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; `report()` swaps the per-interval
//! counters to produce a snapshot.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use crate::error::RouterError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Failure labels, indexed by `failure_index`
pub const FAILURE_KINDS: [&str; 6] =
    ["decode", "unknown_event", "invalid", "not_found", "store", "publish"];

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn failure_index(err: &RouterError) -> usize {
    match err {
        RouterError::Decode(_) => 0,
        RouterError::UnknownEvent(_) => 1,
        RouterError::Invalid(_) => 2,
        RouterError::NotFound(_) => 3,
        RouterError::Store(_) => 4,
        RouterError::Publish(_) => 5,
    }
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

fn load_all<const N: usize>(atomics: &[AtomicU64; N]) -> [u64; N] {
    let mut result = [0u64; N];
    for (i, a) in atomics.iter().enumerate() {
        result[i] = a.load(Ordering::Relaxed);
    }
    result
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Inbound payloads read from the transport (monotonic)
    messages_received: AtomicU64,
    /// Inbound payloads handled without error (monotonic)
    messages_handled: AtomicU64,
    /// Failed payloads by kind (monotonic)
    failures: [AtomicU64; FAILURE_KINDS.len()],
    /// Messages currently being handled
    in_flight: AtomicU64,
    /// Handling latency histogram (monotonic, cumulative)
    handle_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Sum of handling latencies in microseconds (monotonic)
    handle_latency_sum_us: AtomicU64,
    /// Max handling latency since last report (reset on report)
    handle_latency_max_us: AtomicU64,
    /// Handled messages since last report (reset on report)
    messages_since_report: AtomicU64,
    /// FreightCalculated events published (monotonic)
    freight_published: AtomicU64,
    /// Deliveries launched (monotonic)
    deliveries_started: AtomicU64,
    /// Deliveries whose producer and publisher both finished (monotonic)
    deliveries_finished: AtomicU64,
    /// Positions handed to a delivery channel (monotonic)
    positions_produced: AtomicU64,
    /// DriverMoved events published (monotonic)
    positions_published: AtomicU64,
    /// DriverMoved publishes that failed (monotonic)
    position_publish_failures: AtomicU64,
    /// Publisher loops that exited on the idle guard instead of completion (monotonic)
    idle_timeouts: AtomicU64,
    last_report: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_handled: AtomicU64::new(0),
            failures: Default::default(),
            in_flight: AtomicU64::new(0),
            handle_latency_buckets: Default::default(),
            handle_latency_sum_us: AtomicU64::new(0),
            handle_latency_max_us: AtomicU64::new(0),
            messages_since_report: AtomicU64::new(0),
            freight_published: AtomicU64::new(0),
            deliveries_started: AtomicU64::new(0),
            deliveries_finished: AtomicU64::new(0),
            positions_produced: AtomicU64::new(0),
            positions_published: AtomicU64::new(0),
            position_publish_failures: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            last_report: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one inbound message and its handling latency
    pub fn record_message_done(&self, result: Result<(), &RouterError>, latency_us: u64) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        match result {
            Ok(()) => {
                self.messages_handled.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failures[failure_index(e)].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.handle_latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.handle_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.handle_latency_max_us, latency_us);
        self.messages_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_freight_published(&self) {
        self.freight_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivery_started(&self) {
        self.deliveries_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivery_finished(&self) {
        self.deliveries_finished.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_produced(&self) {
        self.positions_produced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_published(&self) {
        self.positions_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_publish_failed(&self) {
        self.position_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot for the periodic log. Resets the per-interval rate and max.
    pub fn report(&self, active_deliveries: usize) -> MetricsSummary {
        self.summarize(active_deliveries, true)
    }

    /// Take a snapshot without touching the per-interval counters (scrapes)
    pub fn snapshot(&self, active_deliveries: usize) -> MetricsSummary {
        self.summarize(active_deliveries, false)
    }

    fn summarize(&self, active_deliveries: usize, reset: bool) -> MetricsSummary {
        let (since, max_us, elapsed) = if reset {
            let mut last = self.last_report.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            (
                self.messages_since_report.swap(0, Ordering::Relaxed),
                self.handle_latency_max_us.swap(0, Ordering::Relaxed),
                elapsed,
            )
        } else {
            (
                self.messages_since_report.load(Ordering::Relaxed),
                self.handle_latency_max_us.load(Ordering::Relaxed),
                self.last_report.lock().elapsed().as_secs_f64(),
            )
        };
        let messages_per_sec = if elapsed > 0.0 { since as f64 / elapsed } else { 0.0 };

        let buckets = load_all(&self.handle_latency_buckets);
        let count: u64 = buckets.iter().sum();
        let sum = self.handle_latency_sum_us.load(Ordering::Relaxed);

        MetricsSummary {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            failures: load_all(&self.failures),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            messages_per_sec,
            handle_latency_buckets: buckets,
            handle_latency_sum_us: sum,
            handle_latency_avg_us: if count > 0 { sum / count } else { 0 },
            handle_latency_max_us: max_us,
            freight_published: self.freight_published.load(Ordering::Relaxed),
            deliveries_started: self.deliveries_started.load(Ordering::Relaxed),
            deliveries_finished: self.deliveries_finished.load(Ordering::Relaxed),
            active_deliveries,
            positions_produced: self.positions_produced.load(Ordering::Relaxed),
            positions_published: self.positions_published.load(Ordering::Relaxed),
            position_publish_failures: self.position_publish_failures.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub messages_received: u64,
    pub messages_handled: u64,
    pub failures: [u64; FAILURE_KINDS.len()],
    pub in_flight: u64,
    pub messages_per_sec: f64,
    pub handle_latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub handle_latency_sum_us: u64,
    pub handle_latency_avg_us: u64,
    pub handle_latency_max_us: u64,
    pub freight_published: u64,
    pub deliveries_started: u64,
    pub deliveries_finished: u64,
    pub active_deliveries: usize,
    pub positions_produced: u64,
    pub positions_published: u64,
    pub position_publish_failures: u64,
    pub idle_timeouts: u64,
}

impl MetricsSummary {
    pub fn failures_total(&self) -> u64 {
        self.failures.iter().sum()
    }

    pub fn log(&self) {
        info!(
            received = %self.messages_received,
            handled = %self.messages_handled,
            failed = %self.failures_total(),
            in_flight = %self.in_flight,
            msg_per_sec = %format!("{:.1}", self.messages_per_sec),
            avg_latency_us = %self.handle_latency_avg_us,
            max_latency_us = %self.handle_latency_max_us,
            freight_published = %self.freight_published,
            deliveries_active = %self.active_deliveries,
            deliveries_started = %self.deliveries_started,
            positions_published = %self.positions_published,
            position_publish_failures = %self.position_publish_failures,
            idle_timeouts = %self.idle_timeouts,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_message_outcomes() {
        let metrics = Metrics::new();
        for _ in 0..3 {
            metrics.record_message_received();
        }
        metrics.record_message_done(Ok(()), 150);
        metrics.record_message_done(Err(&RouterError::UnknownEvent("X".into())), 50);
        assert_eq!(metrics.report(0).in_flight, 1);

        metrics.record_message_done(Err(&RouterError::NotFound("r1".into())), 300);
        let summary = metrics.report(2);
        assert_eq!(summary.messages_received, 3);
        assert_eq!(summary.messages_handled, 1);
        assert_eq!(summary.failures_total(), 2);
        assert_eq!(summary.failures[1], 1);
        assert_eq!(summary.failures[3], 1);
        assert_eq!(summary.in_flight, 0);
        assert_eq!(summary.active_deliveries, 2);
        assert_eq!(summary.handle_latency_avg_us, 500 / 3);
        // max resets on report
        assert_eq!(summary.handle_latency_max_us, 300);
        assert_eq!(metrics.report(0).handle_latency_max_us, 0);
    }

    #[test]
    fn test_delivery_counters() {
        let metrics = Metrics::new();
        metrics.record_delivery_started();
        metrics.record_position_produced();
        metrics.record_position_produced();
        metrics.record_position_published();
        metrics.record_position_publish_failed();
        metrics.record_delivery_finished();

        let summary = metrics.report(0);
        assert_eq!(summary.deliveries_started, 1);
        assert_eq!(summary.deliveries_finished, 1);
        assert_eq!(summary.positions_produced, 2);
        assert_eq!(summary.positions_published, 1);
        assert_eq!(summary.position_publish_failures, 1);
    }

    #[test]
    fn test_snapshot_leaves_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_message_received();
        metrics.record_message_done(Ok(()), 700);

        assert_eq!(metrics.snapshot(0).handle_latency_max_us, 700);
        assert_eq!(metrics.snapshot(0).handle_latency_max_us, 700);
        assert_eq!(metrics.report(0).handle_latency_max_us, 700);
        assert_eq!(metrics.snapshot(0).handle_latency_max_us, 0);
    }
}
