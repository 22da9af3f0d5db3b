//! Running performance metrics for orchestrated operations
//!
//! `MetricsAggregator` keeps the process-wide counters and cumulative mean
//! response time. Every record is mirrored into Prometheus so the same data
//! can be scraped through [`gather`].

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use log::info;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramOpts, HistogramVec,
    IntCounterVec, TextEncoder,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::core::WorkflowKind;

const LATENCY_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
];

static OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "conductor_operations_total",
        "Orchestrated workflow invocations by outcome",
        &["workflow", "outcome"]
    )
    .unwrap()
});

static LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "conductor_operation_latency_ms",
        "Orchestrated workflow latency in milliseconds",
    )
    .buckets(LATENCY_BUCKETS.to_vec());
    register_histogram_vec!(opts, &["workflow"]).unwrap()
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    /// Cumulative mean in milliseconds
    pub average_response_time_ms: f64,
    pub last_operation_at: Option<SystemTime>,
}

impl PerformanceMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.successful_operations as f64 / self.total_operations as f64 * 100.0
    }
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<PerformanceMetrics>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed operation into the running metrics
    pub fn record(&self, success: bool, elapsed: Duration) {
        let elapsed_ms = elapsed.as_nanos() as f64 / 1_000_000.0;
        let mut metrics = self.lock();

        metrics.total_operations += 1;
        if success {
            metrics.successful_operations += 1;
        } else {
            metrics.failed_operations += 1;
        }

        let n = metrics.total_operations as f64;
        metrics.average_response_time_ms =
            (metrics.average_response_time_ms * (n - 1.0) + elapsed_ms) / n;
        metrics.last_operation_at = Some(SystemTime::now());
    }

    /// Record an operation and mirror it into Prometheus
    pub fn record_workflow(&self, workflow: WorkflowKind, success: bool, elapsed: Duration) {
        self.record(success, elapsed);

        let outcome = if success { "success" } else { "failure" };
        OPERATIONS
            .with_label_values(&[workflow.as_str(), outcome])
            .inc();
        LATENCY
            .with_label_values(&[workflow.as_str()])
            .observe(elapsed.as_nanos() as f64 / 1_000_000.0);
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, PerformanceMetrics> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Render every registered metric in the Prometheus text format
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::error!("Failed to encode metrics: {e}");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Logs a metrics snapshot on a fixed interval until shut down
pub struct MetricsReporter {
    metrics: Arc<MetricsAggregator>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<MetricsAggregator>, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting metrics reporter");
        let mut ticker = tokio::time::interval(self.interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let m = self.metrics.snapshot();
                    info!(
                        "Metrics: total={} ok={} failed={} avg={:.2}ms success_rate={:.1}%",
                        m.total_operations,
                        m.successful_operations,
                        m.failed_operations,
                        m.average_response_time_ms,
                        m.success_rate()
                    );
                }
            }
        }

        info!("Metrics reporter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cumulative_average() {
        let aggregator = MetricsAggregator::new();
        for ms in [100, 200, 300] {
            aggregator.record(true, Duration::from_millis(ms));
        }

        let metrics = aggregator.snapshot();
        assert_eq!(metrics.total_operations, 3);
        assert_eq!(metrics.successful_operations, 3);
        assert_eq!(metrics.failed_operations, 0);
        assert_eq!(metrics.average_response_time_ms, 200.0);
        assert!(metrics.last_operation_at.is_some());
    }

    #[test]
    fn test_failures_counted() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(true, Duration::from_millis(10));
        aggregator.record(false, Duration::from_millis(30));

        let metrics = aggregator.snapshot();
        assert_eq!(metrics.failed_operations, 1);
        assert_eq!(metrics.average_response_time_ms, 20.0);
        assert_eq!(metrics.success_rate(), 50.0);
        assert_eq!(PerformanceMetrics::default().success_rate(), 0.0);
    }

    #[test]
    fn test_concurrent_records() {
        let aggregator = Arc::new(MetricsAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        aggregator.record(i % 2 == 0, Duration::from_millis(5));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = aggregator.snapshot();
        assert_eq!(metrics.total_operations, 800);
        assert_eq!(metrics.successful_operations, 400);
        assert_eq!(metrics.failed_operations, 400);
        assert!((metrics.average_response_time_ms - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_workflow_metrics_exported() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_workflow(WorkflowKind::BuildDashboard, true, Duration::from_millis(3));
        let text = gather();
        assert!(text.contains("conductor_operations_total"));
        assert!(text.contains("build_dashboard"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let reporter = MetricsReporter::new(Arc::new(MetricsAggregator::new()), Duration::from_secs(1));
        let handle = tokio::spawn(reporter.run(rx));

        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
