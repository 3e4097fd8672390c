//! # Anomaly Detector
//!
//! ## Responsibility
//! Flag metric readings that are statistically inconsistent with their
//! recent history, using a z-score test over the rolling window held by the
//! [`MetricsStore`]. Detected anomalies are kept in a bounded log and can be
//! queried, filtered and resolved.
//!
//! ## Guarantees
//! - Thread-safe: append-and-detect runs as a single atomic unit per call,
//!   so no reader observes a window mid-update
//! - A reading is scored against the window *before* it is appended, so a
//!   spike never dilutes its own baseline
//! - Zero variance never flags: if every observed value is identical, no
//!   deviation is anomalous
//! - Per-metric cooldown: repeated deviations from one underlying cause
//!   produce at most one anomaly per cooldown period
//!
//! ## NOT Responsible For
//! - Halting evolution (the governor polls this log and owns that policy)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DetectorConfig;
use crate::telemetry::store::{MetricStats, MetricsStore};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors produced by the anomaly detection subsystem.
///
/// Too few samples for detection is *not* an error — `record` returns
/// `Ok(None)` in that case.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// An internal mutex was poisoned by a panicking thread.
    #[error("detector lock poisoned")]
    LockPoisoned,

    /// A NaN or infinite value was submitted; it would poison every later
    /// mean/stddev computation on the window, so it is rejected outright.
    #[error("non-finite sample ({value}) rejected for metric '{metric}'")]
    NonFiniteSample {
        /// The metric the sample was submitted for.
        metric: String,
        /// The rejected value.
        value: f64,
    },
}

// ─── Severity ────────────────────────────────────────────────────────────────

/// Severity band of a detected anomaly, classified by |z| magnitude.
///
/// Ordered from least to most severe so `Ord` comparisons are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// |z| in `[3, 5)` — notable deviation, worth monitoring.
    Warning,
    /// |z| in `[5, 8)` — severe deviation.
    High,
    /// |z| of 8 or more — extreme deviation, automation should halt.
    Critical,
}

impl Severity {
    /// Band for an absolute z-score.
    ///
    /// Callers only classify values that already exceeded the detection
    /// threshold; magnitudes below 5 map to [`Severity::Warning`].
    pub fn from_abs_z(z: f64) -> Self {
        if z >= 8.0 {
            Severity::Critical
        } else if z >= 5.0 {
            Severity::High
        } else {
            Severity::Warning
        }
    }

    /// Lowercase label, for log fields and report text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Anomaly record ──────────────────────────────────────────────────────────

/// A single detected anomaly.
///
/// Immutable after creation except for the `resolved` flag, which is flipped
/// exactly once by [`AnomalyDetector::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Unique identifier, used to resolve the anomaly later.
    pub id: String,
    /// Metric the anomaly was detected on.
    pub metric: String,
    /// Severity band.
    pub severity: Severity,
    /// Signed z-score of the observed value against the pre-append window.
    pub z_score: f64,
    /// The observed value that triggered detection.
    pub value: f64,
    /// Lower edge of the expected range at detection time.
    pub expected_min: f64,
    /// Upper edge of the expected range at detection time.
    pub expected_max: f64,
    /// Unix timestamp (seconds) of detection.
    pub detected_at_secs: u64,
    /// Whether an operator has acknowledged this anomaly.
    pub resolved: bool,
}

// ─── Query filter ────────────────────────────────────────────────────────────

/// Filter for querying the anomaly log. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AnomalyFilter {
    /// Only anomalies on this metric.
    pub metric: Option<String>,
    /// Only anomalies of at least this severity.
    pub min_severity: Option<Severity>,
    /// Only anomalies detected at or after this Unix timestamp.
    pub since_secs: Option<u64>,
    /// Only anomalies with this resolved state.
    pub resolved: Option<bool>,
}

impl AnomalyFilter {
    /// Whether `anomaly` passes every set criterion.
    pub fn matches(&self, anomaly: &Anomaly) -> bool {
        if let Some(metric) = &self.metric {
            if &anomaly.metric != metric {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if anomaly.severity < min {
                return false;
            }
        }
        if let Some(since) = self.since_secs {
            if anomaly.detected_at_secs < since {
                return false;
            }
        }
        if let Some(resolved) = self.resolved {
            if anomaly.resolved != resolved {
                return false;
            }
        }
        true
    }
}

// ─── Internal state ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct DetectorInner {
    config: DetectorConfig,
    store: MetricsStore,
    anomalies: Vec<Anomaly>,
    /// Per-metric timestamp of the last *emitted* anomaly. Suppressed
    /// detections do not refresh the cooldown.
    cooldowns: HashMap<String, u64>,
}

// ─── AnomalyDetector ─────────────────────────────────────────────────────────

/// Thread-safe z-score anomaly detector over per-metric rolling windows.
///
/// Cloning produces a handle sharing the same state.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    inner: Arc<Mutex<DetectorInner>>,
    clock: Arc<dyn Clock>,
}

impl AnomalyDetector {
    /// Create a detector with the given configuration and time source.
    pub fn new(config: DetectorConfig, clock: Arc<dyn Clock>) -> Self {
        let store = MetricsStore::new(config.window_size);
        Self {
            inner: Arc::new(Mutex::new(DetectorInner {
                config,
                store,
                anomalies: Vec::new(),
                cooldowns: HashMap::new(),
            })),
            clock,
        }
    }

    /// Record one reading and return the anomaly it triggered, if any.
    ///
    /// The reading is scored against the current window, then appended. A
    /// window with fewer than `min_samples` readings, a zero standard
    /// deviation, a |z| at or below the threshold, or an active cooldown all
    /// yield `Ok(None)` — these are normal outcomes, not errors.
    ///
    /// # Errors
    /// - [`DetectorError::NonFiniteSample`] if `value` is NaN or infinite;
    ///   the window is left untouched.
    /// - [`DetectorError::LockPoisoned`] if the internal mutex is poisoned.
    pub fn record(
        &self,
        metric: &str,
        value: f64,
        context: Option<String>,
    ) -> Result<Option<Anomaly>, DetectorError> {
        if !value.is_finite() {
            return Err(DetectorError::NonFiniteSample {
                metric: metric.to_string(),
                value,
            });
        }
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock().map_err(|_| DetectorError::LockPoisoned)?;
        Ok(Self::record_inner(&mut inner, metric, value, context, now))
    }

    /// Record a batch of readings and return every anomaly triggered.
    ///
    /// The whole batch is validated up front: if any value is non-finite,
    /// nothing is recorded.
    ///
    /// # Errors
    /// - [`DetectorError::NonFiniteSample`] for the first non-finite value.
    /// - [`DetectorError::LockPoisoned`] if the internal mutex is poisoned.
    pub fn record_batch(
        &self,
        readings: &[(String, f64)],
    ) -> Result<Vec<Anomaly>, DetectorError> {
        for (metric, value) in readings {
            if !value.is_finite() {
                return Err(DetectorError::NonFiniteSample {
                    metric: metric.clone(),
                    value: *value,
                });
            }
        }
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock().map_err(|_| DetectorError::LockPoisoned)?;
        let mut emitted = Vec::new();
        for (metric, value) in readings {
            emitted.extend(Self::record_inner(&mut inner, metric, *value, None, now));
        }
        Ok(emitted)
    }

    /// Summary statistics for `metric`, with the expected range derived from
    /// the detection threshold. `None` if the metric has no samples.
    pub fn stats(&self, metric: &str) -> Option<MetricStats> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.store.stats(metric, inner.config.z_threshold))
    }

    /// Anomalies matching `filter`, newest first.
    pub fn anomalies(&self, filter: &AnomalyFilter) -> Vec<Anomaly> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .anomalies
                    .iter()
                    .rev()
                    .filter(|a| filter.matches(a))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All currently unresolved anomalies, newest first.
    pub fn unresolved(&self) -> Vec<Anomaly> {
        self.anomalies(&AnomalyFilter {
            resolved: Some(false),
            ..AnomalyFilter::default()
        })
    }

    /// Mark an anomaly resolved.
    ///
    /// Idempotent: returns `true` if the flag was flipped by this call, and
    /// `false` — not an error — if the id is unknown or already resolved.
    ///
    /// # Errors
    /// Returns [`DetectorError::LockPoisoned`] if the internal mutex is
    /// poisoned.
    pub fn resolve(&self, anomaly_id: &str) -> Result<bool, DetectorError> {
        let mut inner = self.inner.lock().map_err(|_| DetectorError::LockPoisoned)?;
        match inner
            .anomalies
            .iter_mut()
            .find(|a| a.id == anomaly_id && !a.resolved)
        {
            Some(anomaly) => {
                anomaly.resolved = true;
                tracing::info!(anomaly_id = %anomaly_id, metric = %anomaly.metric, "anomaly resolved");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Names of all metrics with at least one retained sample, sorted.
    pub fn metric_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.store.metric_names())
            .unwrap_or_default()
    }

    /// Total number of samples retained across all windows.
    pub fn sample_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.store.sample_count())
            .unwrap_or(0)
    }

    // ── Private helpers ──────────────────────────────────────────────────────

    /// Core record logic on the already-locked inner state. Detection runs
    /// against the window as it stood before this sample.
    fn record_inner(
        inner: &mut DetectorInner,
        metric: &str,
        value: f64,
        context: Option<String>,
        now: u64,
    ) -> Option<Anomaly> {
        let mut emitted = None;

        if inner.store.len(metric) >= inner.config.min_samples {
            if let Some((mean, stddev)) = inner.store.mean_stddev(metric) {
                if stddev > f64::EPSILON {
                    let z = (value - mean) / stddev;
                    if z.abs() > inner.config.z_threshold {
                        let cooled = inner
                            .cooldowns
                            .get(metric)
                            .map_or(true, |&last| {
                                now.saturating_sub(last) >= inner.config.cooldown_secs
                            });
                        if cooled {
                            let anomaly = Anomaly {
                                id: Uuid::new_v4().to_string(),
                                metric: metric.to_string(),
                                severity: Severity::from_abs_z(z.abs()),
                                z_score: z,
                                value,
                                expected_min: mean - inner.config.z_threshold * stddev,
                                expected_max: mean + inner.config.z_threshold * stddev,
                                detected_at_secs: now,
                                resolved: false,
                            };
                            tracing::warn!(
                                metric = %metric,
                                value = value,
                                z_score = z,
                                severity = ?anomaly.severity,
                                "anomaly detected"
                            );
                            inner.cooldowns.insert(metric.to_string(), now);
                            inner.anomalies.push(anomaly.clone());
                            Self::cap_anomalies(inner);
                            emitted = Some(anomaly);
                        } else {
                            tracing::debug!(
                                metric = %metric,
                                z_score = z,
                                "anomaly suppressed by cooldown"
                            );
                        }
                    }
                }
            }
        }

        inner.store.append(metric, value, now, context);
        emitted
    }

    /// Trim the anomaly log to `max_anomalies` entries, oldest first.
    fn cap_anomalies(inner: &mut DetectorInner) {
        let max = inner.config.max_anomalies;
        if inner.anomalies.len() > max {
            let excess = inner.anomalies.len() - max;
            inner.anomalies.drain(..excess);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
