//! # Time Source
//!
//! Injectable wall-clock abstraction. Every timestamp the optimizer records
//! (samples, anomalies, cycle start/end, safe-mode transitions) flows through
//! a [`Clock`], so tests can drive time deterministically — cooldown windows
//! in particular are untestable against a real clock.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of Unix timestamps (whole seconds).
///
/// Production code uses [`SystemClock`]; tests inject a [`ManualClock`].
pub trait Clock: Send + Sync + Debug {
    /// Current Unix time in whole seconds.
    fn now_secs(&self) -> u64;
}

/// Wall-clock time from the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        // 0 if the system clock is before the epoch (should never happen).
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Cloning shares the underlying counter, so the handle given to the
/// optimizer and the one kept by the test observe the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock pinned at `start_secs`.
    pub fn new(start_secs: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_secs)),
        }
    }

    /// Advance the clock by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute timestamp.
    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
