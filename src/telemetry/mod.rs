//! # Telemetry Subsystem
//!
//! Bounded metric history and statistical anomaly detection.
//!
//! ## Module map
//! - [`store`]   -- per-metric rolling windows and summary statistics
//! - [`anomaly`] -- z-score detection, severity bands, cooldown, resolution
//!
//! The detector owns the store behind its lock: recording a sample and
//! recomputing window statistics happen as one atomic unit, so concurrent
//! callers never observe a half-updated window.

pub mod anomaly;
pub mod store;

pub use anomaly::{Anomaly, AnomalyDetector, AnomalyFilter, DetectorError, Severity};
pub use store::{MetricSample, MetricStats, MetricsStore};
