//! An in-process [`MetricsSink`], grounded on the Python SDK's
//! `InMemoryMetrics` (`tests/unit/infrastructure/test_in_memory_metrics.py`):
//! counters and observations land in a `Mutex`-guarded map so a test can
//! assert on them directly instead of scraping a real metrics backend.

use std::collections::HashMap;
use std::sync::Mutex;

use aegis_types::MetricsSink;

/// One recorded series: either a running counter total or the list of
/// observed values, keyed by `(name, sorted labels)`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Series {
    pub counter_total: u64,
    pub observations: Vec<f64>,
}

/// Records every `incr`/`observe` call in memory, for test assertions.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    series: Mutex<HashMap<String, Series>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
        let mut sorted: Vec<(&str, &str)> = labels.to_vec();
        sorted.sort_unstable();
        let labels_part = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        if labels_part.is_empty() {
            name.to_string()
        } else {
            format!("{name}[{labels_part}]")
        }
    }

    /// The running total for a counter, or `0` if it was never incremented.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = Self::series_key(name, labels);
        self.series.lock().expect("metrics mutex poisoned").get(&key).map_or(0, |s| s.counter_total)
    }

    /// All observations recorded against a histogram/summary name, in call
    /// order.
    pub fn observations(&self, name: &str, labels: &[(&str, &str)]) -> Vec<f64> {
        let key = Self::series_key(name, labels);
        self.series
            .lock()
            .expect("metrics mutex poisoned")
            .get(&key)
            .map(|s| s.observations.clone())
            .unwrap_or_default()
    }

    /// A snapshot of every series recorded so far, keyed by the same string
    /// `incr`/`observe` were called with (labels included).
    pub fn get_all(&self) -> HashMap<String, Series> {
        self.series.lock().expect("metrics mutex poisoned").clone()
    }

    pub fn clear(&self) {
        self.series.lock().expect("metrics mutex poisoned").clear();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr(&self, name: &str, value: u64, labels: &[(&str, &str)]) {
        let key = Self::series_key(name, labels);
        let mut series = self.series.lock().expect("metrics mutex poisoned");
        series.entry(key).or_default().counter_total += value;
    }

    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::series_key(name, labels);
        let mut series = self.series.lock().expect("metrics mutex poisoned");
        series.entry(key).or_default().observations.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates_across_calls() {
        let metrics = InMemoryMetrics::new();
        metrics.incr("election.transitions", 1, &[("service", "orders")]);
        metrics.incr("election.transitions", 2, &[("service", "orders")]);
        assert_eq!(metrics.counter("election.transitions", &[("service", "orders")]), 3);
    }

    #[test]
    fn labels_are_order_independent() {
        let metrics = InMemoryMetrics::new();
        metrics.incr("x", 1, &[("a", "1"), ("b", "2")]);
        metrics.incr("x", 1, &[("b", "2"), ("a", "1")]);
        assert_eq!(metrics.counter("x", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn observations_preserve_order() {
        let metrics = InMemoryMetrics::new();
        metrics.observe("rpc.latency_seconds", 0.1, &[]);
        metrics.observe("rpc.latency_seconds", 0.2, &[]);
        assert_eq!(metrics.observations("rpc.latency_seconds", &[]), vec![0.1, 0.2]);
    }

    #[test]
    fn distinct_label_sets_are_distinct_series() {
        let metrics = InMemoryMetrics::new();
        metrics.incr("x", 1, &[("service", "orders")]);
        metrics.incr("x", 1, &[("service", "payments")]);
        assert_eq!(metrics.counter("x", &[("service", "orders")]), 1);
        assert_eq!(metrics.counter("x", &[("service", "payments")]), 1);
    }
}
