//! Read-only statistics over breakers and executor counters.
//!
//! The reporter never mutates state and is safe to call concurrently from
//! any task; it shares the underlying registry and counters by `Arc`, so
//! cloning one is cheap.

use crate::circuit_breaker::CircuitBreakerSnapshot;
use crate::registry::BreakerRegistry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Bounded rolling window of observed call latencies.
pub(crate) const LATENCY_WINDOW_SIZE: usize = 100;

#[derive(Debug, Default)]
pub(crate) struct LatencyWindow {
    samples: VecDeque<Duration>,
}

impl LatencyWindow {
    pub(crate) fn record(&mut self, latency: Duration) {
        if self.samples.len() == LATENCY_WINDOW_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    pub(crate) fn snapshot(&self) -> Option<LatencySnapshot> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        let min = *self.samples.iter().min().expect("window is non-empty");
        let max = *self.samples.iter().max().expect("window is non-empty");
        Some(LatencySnapshot {
            samples: self.samples.len(),
            avg_ms: (total / self.samples.len() as u32).as_millis() as u64,
            min_ms: min.as_millis() as u64,
            max_ms: max.as_millis() as u64,
        })
    }
}

/// Latency summary over the rolling window of recent successful calls.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    /// Number of samples in the window (capped).
    pub samples: usize,
    /// Mean latency in milliseconds.
    pub avg_ms: u64,
    /// Fastest observed call in milliseconds.
    pub min_ms: u64,
    /// Slowest observed call in milliseconds.
    pub max_ms: u64,
}

/// Combined snapshot of every operation, shaped for an admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceReport {
    /// Circuit breaker snapshots keyed by operation.
    pub circuits: HashMap<String, CircuitBreakerSnapshot>,
    /// Failure counts keyed by operation.
    pub error_counts: HashMap<String, u64>,
    /// Latency summaries keyed by operation.
    pub latencies: HashMap<String, LatencySnapshot>,
}

/// Read-side view over the executor's registry and counters.
#[derive(Clone)]
pub struct StatsReporter {
    registry: BreakerRegistry,
    error_counts: Arc<DashMap<String, u64>>,
    latencies: Arc<DashMap<String, LatencyWindow>>,
}

impl StatsReporter {
    pub(crate) fn new(
        registry: BreakerRegistry,
        error_counts: Arc<DashMap<String, u64>>,
        latencies: Arc<DashMap<String, LatencyWindow>>,
    ) -> Self {
        Self {
            registry,
            error_counts,
            latencies,
        }
    }

    /// Snapshot one operation's breaker, if it has ever been referenced.
    pub fn snapshot(&self, operation: &str) -> Option<CircuitBreakerSnapshot> {
        self.registry.get(operation).map(|breaker| breaker.stats())
    }

    /// Snapshot every registered breaker.
    pub fn snapshot_all(&self) -> HashMap<String, CircuitBreakerSnapshot> {
        self.registry.snapshots()
    }

    /// Failure counts per operation.
    pub fn error_counts(&self) -> HashMap<String, u64> {
        self.error_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Latency summary for one operation's recent successful calls.
    pub fn operation_latency(&self, operation: &str) -> Option<LatencySnapshot> {
        self.latencies
            .get(operation)
            .and_then(|window| window.value().snapshot())
    }

    /// Full report over all operations.
    pub fn report(&self) -> ResilienceReport {
        ResilienceReport {
            circuits: self.snapshot_all(),
            error_counts: self.error_counts(),
            latencies: self
                .latencies
                .iter()
                .filter_map(|entry| {
                    entry
                        .value()
                        .snapshot()
                        .map(|snapshot| (entry.key().clone(), snapshot))
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for StatsReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsReporter")
            .field("registry", &self.registry)
            .field("tracked_operations", &self.error_counts.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;

    #[test]
    fn test_latency_window_is_bounded() {
        let mut window = LatencyWindow::default();
        for i in 0..250 {
            window.record(Duration::from_millis(i));
        }

        let snapshot = window.snapshot().unwrap();
        assert_eq!(snapshot.samples, LATENCY_WINDOW_SIZE);
        // Only the most recent 100 samples survive: 150..=249.
        assert_eq!(snapshot.min_ms, 150);
        assert_eq!(snapshot.max_ms, 249);
    }

    #[test]
    fn test_empty_window_has_no_snapshot() {
        assert!(LatencyWindow::default().snapshot().is_none());
    }

    #[test]
    fn test_report_serializes_to_json() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        registry.get_or_create("svc-a", None).record_success();

        let error_counts = Arc::new(DashMap::new());
        error_counts.insert("svc-a".to_string(), 2u64);

        let latencies: Arc<DashMap<String, LatencyWindow>> = Arc::new(DashMap::new());
        latencies
            .entry("svc-a".to_string())
            .or_default()
            .record(Duration::from_millis(12));

        let reporter = StatsReporter::new(registry, error_counts, latencies);
        let report = reporter.report();
        assert_eq!(report.error_counts["svc-a"], 2);
        assert_eq!(report.latencies["svc-a"].samples, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["circuits"]["svc-a"]["state"], "CLOSED");
        assert_eq!(json["latencies"]["svc-a"]["avg_ms"], 12);
    }
}
