//! # Metrics Store
//!
//! ## Responsibility
//! Keep a bounded, per-metric history of observed values and compute summary
//! statistics (mean, stddev, min/max, percentiles, expected range) over the
//! current window.
//!
//! ## Guarantees
//! - Bounded memory: each window holds at most `window_size` samples,
//!   oldest evicted first
//! - O(window) statistics, computed on demand from a snapshot
//!
//! ## NOT Responsible For
//! - Synchronization: the anomaly detector owns a store behind its own lock
//!   so append-and-detect runs as a single atomic unit per caller
//! - Flagging anomalies (see [`super::anomaly`])

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

// ─── Records ─────────────────────────────────────────────────────────────────

/// A single observed metric reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Name of the observed metric.
    pub metric: String,
    /// Observed value.
    pub value: f64,
    /// Unix timestamp (seconds) when the sample was recorded.
    pub timestamp_secs: u64,
    /// Optional free-form annotation (e.g. the emitting host or build).
    pub context: Option<String>,
}

/// Summary statistics over a metric's current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    /// The metric these statistics describe.
    pub metric: String,
    /// Number of samples in the window.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    /// Smallest value in the window.
    pub min: f64,
    /// Largest value in the window.
    pub max: f64,
    /// 25th percentile (nearest rank).
    pub p25: f64,
    /// 50th percentile (nearest rank).
    pub p50: f64,
    /// 75th percentile (nearest rank).
    pub p75: f64,
    /// 95th percentile (nearest rank).
    pub p95: f64,
    /// 99th percentile (nearest rank).
    pub p99: f64,
    /// Lower edge of the expected range, `mean - k * stddev`.
    pub expected_min: f64,
    /// Upper edge of the expected range, `mean + k * stddev`.
    pub expected_max: f64,
}

// ─── MetricsStore ────────────────────────────────────────────────────────────

/// Bounded per-metric sample history.
#[derive(Debug)]
pub struct MetricsStore {
    window_size: usize,
    windows: HashMap<String, VecDeque<MetricSample>>,
}

impl MetricsStore {
    /// Create a store whose windows retain at most `window_size` samples.
    /// A zero size is treated as 1.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: HashMap::new(),
        }
    }

    /// Append a sample to the metric's window, evicting the oldest sample
    /// once the window is full.
    pub fn append(
        &mut self,
        metric: &str,
        value: f64,
        timestamp_secs: u64,
        context: Option<String>,
    ) {
        let window = self.windows.entry(metric.to_string()).or_default();
        window.push_back(MetricSample {
            metric: metric.to_string(),
            value,
            timestamp_secs,
            context,
        });
        while window.len() > self.window_size {
            window.pop_front();
        }
    }

    /// Number of samples currently retained for `metric`.
    pub fn len(&self, metric: &str) -> usize {
        self.windows.get(metric).map_or(0, VecDeque::len)
    }

    /// Whether no samples are retained for `metric`.
    pub fn is_empty(&self, metric: &str) -> bool {
        self.len(metric) == 0
    }

    /// Mean and population standard deviation over the current window, or
    /// `None` if the metric has no samples.
    pub fn mean_stddev(&self, metric: &str) -> Option<(f64, f64)> {
        let window = self.windows.get(metric)?;
        if window.is_empty() {
            return None;
        }
        let values: Vec<f64> = window.iter().map(|s| s.value).collect();
        Some(mean_stddev(&values))
    }

    /// Summary statistics for `metric`, with the expected range set to
    /// `mean ± range_factor * stddev`. Returns `None` for an empty window.
    pub fn stats(&self, metric: &str, range_factor: f64) -> Option<MetricStats> {
        let window = self.windows.get(metric)?;
        if window.is_empty() {
            return None;
        }

        let mut values: Vec<f64> = window.iter().map(|s| s.value).collect();
        let (mean, stddev) = mean_stddev(&values);
        values.sort_unstable_by(f64::total_cmp);
        let count = values.len();

        Some(MetricStats {
            metric: metric.to_string(),
            count,
            mean,
            stddev,
            min: values[0],
            max: values[count - 1],
            p25: percentile(&values, 0.25),
            p50: percentile(&values, 0.50),
            p75: percentile(&values, 0.75),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
            expected_min: mean - range_factor * stddev,
            expected_max: mean + range_factor * stddev,
        })
    }

    /// All metric names with at least one retained sample, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, w)| !w.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Total number of samples retained across all windows.
    pub fn sample_count(&self) -> usize {
        self.windows.values().map(VecDeque::len).sum()
    }
}

// ─── Free helpers ────────────────────────────────────────────────────────────

/// Mean and population standard deviation of a non-empty slice.
fn mean_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Nearest-rank percentile over a sorted, non-empty slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    sorted[((n as f64 * q).ceil() as usize).saturating_sub(1).min(n - 1)]
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_store(metric: &str, values: &[f64]) -> MetricsStore {
        let mut store = MetricsStore::new(1_000);
        for (i, &v) in values.iter().enumerate() {
            store.append(metric, v, i as u64, None);
        }
        store
    }

    // ── Windowing ────────────────────────────────────────────────────────────

    #[test]
    fn test_append_bounded_by_window_size() {
        let mut store = MetricsStore::new(10);
        for i in 0..100 {
            store.append("latency", i as f64, i, None);
        }
        assert_eq!(store.len("latency"), 10);
    }

    #[test]
    fn test_eviction_drops_oldest_first() {
        let mut store = MetricsStore::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            store.append("m", v, 0, None);
        }
        let stats = store.stats("m", 0.0).unwrap();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 4.0);
    }

    #[test]
    fn test_zero_window_size_retains_one_sample() {
        let mut store = MetricsStore::new(0);
        store.append("m", 1.0, 0, None);
        store.append("m", 2.0, 1, None);
        assert_eq!(store.len("m"), 1);
    }

    #[test]
    fn test_windows_are_independent_per_metric() {
        let mut store = MetricsStore::new(100);
        store.append("a", 10.0, 0, None);
        store.append("b", 99.0, 0, None);
        assert_eq!(store.stats("a", 0.0).unwrap().mean, 10.0);
        assert_eq!(store.stats("b", 0.0).unwrap().mean, 99.0);
    }

    #[test]
    fn test_len_and_is_empty_for_unknown_metric() {
        let store = MetricsStore::new(10);
        assert_eq!(store.len("ghost"), 0);
        assert!(store.is_empty("ghost"));
    }

    // ── Statistics ───────────────────────────────────────────────────────────

    #[test]
    fn test_mean_and_stddev() {
        let store = filled_store("m", &[10.0, 20.0, 30.0]);
        let (mean, stddev) = store.mean_stddev("m").unwrap();
        assert!((mean - 20.0).abs() < 1e-10);
        // population stddev of [10, 20, 30] = sqrt(200/3) ≈ 8.165
        assert!((stddev - (200.0f64 / 3.0).sqrt()).abs() < 1e-10);
    }

    #[test]
    fn test_stats_percentiles_nearest_rank() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        let store = filled_store("m", &values);
        let stats = store.stats("m", 3.0).unwrap();
        assert_eq!(stats.p25, 25.0);
        assert_eq!(stats.p50, 50.0);
        assert_eq!(stats.p75, 75.0);
        assert_eq!(stats.p95, 95.0);
        assert_eq!(stats.p99, 99.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.count, 100);
    }

    #[test]
    fn test_stats_expected_range_uses_factor() {
        let store = filled_store("m", &[10.0, 20.0, 30.0]);
        let stats = store.stats("m", 2.0).unwrap();
        assert!((stats.expected_min - (stats.mean - 2.0 * stats.stddev)).abs() < 1e-10);
        assert!((stats.expected_max - (stats.mean + 2.0 * stats.stddev)).abs() < 1e-10);
    }

    #[test]
    fn test_stats_single_sample() {
        let store = filled_store("m", &[42.0]);
        let stats = store.stats("m", 3.0).unwrap();
        assert_eq!(stats.mean, 42.0);
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.p50, 42.0);
        assert_eq!(stats.p99, 42.0);
        assert_eq!(stats.expected_min, 42.0);
        assert_eq!(stats.expected_max, 42.0);
    }

    #[test]
    fn test_stats_unknown_metric_is_none() {
        let store = MetricsStore::new(10);
        assert!(store.stats("ghost", 3.0).is_none());
        assert!(store.mean_stddev("ghost").is_none());
    }

    // ── Introspection ────────────────────────────────────────────────────────

    #[test]
    fn test_metric_names_sorted() {
        let mut store = MetricsStore::new(10);
        store.append("zeta", 1.0, 0, None);
        store.append("alpha", 1.0, 0, None);
        assert_eq!(store.metric_names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_sample_count_across_metrics() {
        let mut store = MetricsStore::new(10);
        store.append("a", 1.0, 0, None);
        store.append("a", 2.0, 1, None);
        store.append("b", 3.0, 2, None);
        assert_eq!(store.sample_count(), 3);
    }

    #[test]
    fn test_sample_serde_round_trip() {
        let sample = MetricSample {
            metric: "m".to_string(),
            value: 1.0,
            timestamp_secs: 5,
            context: Some("canary".to_string()),
        };
        let json = serde_json::to_string(&sample).unwrap();
        let back: MetricSample = serde_json::from_str(&json).unwrap();
        assert_eq!(sample, back);
    }
}
