//! # Evolution Governor
//!
//! ## Responsibility
//! Own the process-wide safe-mode flag: poll the anomaly detector, halt
//! automatic evolution while anomalies are unresolved, and keep an audit
//! trail of every state transition.
//!
//! ## Guarantees
//! - State machine is strictly `NORMAL ↔ SAFE_MODE`; only this module
//!   transitions it
//! - `activate` / `deactivate` are idempotent; repeat calls return `false`
//!   and record nothing
//! - Every transition carries a timestamp and a reason
//! - Safe mode never clears itself: leaving it requires an explicit
//!   `deactivate_safe_mode` after review
//!
//! ## NOT Responsible For
//! - Detecting anomalies (see [`crate::telemetry`])
//! - Blocking evolution: the manager checks the flag and fails fast

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    clock::Clock,
    config::GovernorConfig,
    telemetry::{AnomalyDetector, Severity},
};

// ─── Error ───────────────────────────────────────────────────────────────

/// Errors produced by the governor.
#[derive(Debug, Error)]
pub enum GovernorError {
    /// Internal lock poisoned.
    #[error("governor lock poisoned")]
    LockPoisoned,
}

// ─── State ───────────────────────────────────────────────────────────────

/// Whether automatic evolution is currently permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafeModeState {
    /// Evolution runs normally.
    Normal,
    /// Evolution is disabled pending anomaly review.
    SafeMode,
}

/// Audit record for one safe-mode transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeModeTransition {
    /// State before the transition.
    pub from: SafeModeState,
    /// State after the transition.
    pub to: SafeModeState,
    /// Why the transition happened.
    pub reason: String,
    /// Unix timestamp of the transition.
    pub at_secs: u64,
}

/// Outcome of one `enforce_policies` sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyReport {
    /// Unresolved anomalies observed during the sweep.
    pub unresolved_anomalies: usize,
    /// Safe-mode state after the sweep.
    pub state: SafeModeState,
    /// Whether this sweep changed the state.
    pub state_changed: bool,
    /// Unix timestamp of the sweep.
    pub checked_at_secs: u64,
}

// ─── Governor ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct GovernorInner {
    config: GovernorConfig,
    state: SafeModeState,
    transitions: Vec<SafeModeTransition>,
}

/// Policy layer gating automatic evolution on detector health.
///
/// Cheap to clone — all clones share the same inner state via `Arc<Mutex<_>>`.
#[derive(Debug, Clone)]
pub struct EvolutionGovernor {
    inner: Arc<Mutex<GovernorInner>>,
    detector: AnomalyDetector,
    clock: Arc<dyn Clock>,
}

impl EvolutionGovernor {
    /// Create a governor in the `Normal` state.
    pub fn new(config: GovernorConfig, detector: AnomalyDetector, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GovernorInner {
                config,
                state: SafeModeState::Normal,
                transitions: Vec::new(),
            })),
            detector,
            clock,
        }
    }

    /// `true` while evolution is disabled. A poisoned lock reads as safe
    /// mode: when the flag cannot be trusted, evolution stays halted.
    pub fn is_safe_mode_active(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.state == SafeModeState::SafeMode)
            .unwrap_or(true)
    }

    /// Current state. A poisoned lock reads as [`SafeModeState::SafeMode`].
    pub fn state(&self) -> SafeModeState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(SafeModeState::SafeMode)
    }

    /// Enter safe mode, recording the reason.
    ///
    /// Idempotent: returns `true` if this call performed the transition,
    /// `false` if safe mode was already active.
    ///
    /// # Errors
    /// Returns [`GovernorError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn activate_safe_mode(&self, reason: &str) -> Result<bool, GovernorError> {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock().map_err(|_| GovernorError::LockPoisoned)?;
        if inner.state == SafeModeState::SafeMode {
            return Ok(false);
        }
        tracing::warn!(reason = %reason, "safe mode activated: evolution halted");
        Self::transition(&mut inner, SafeModeState::SafeMode, reason, now);
        Ok(true)
    }

    /// Leave safe mode, recording the reason.
    ///
    /// Idempotent: returns `true` if this call performed the transition,
    /// `false` if the governor was already in `Normal`.
    ///
    /// # Errors
    /// Returns [`GovernorError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn deactivate_safe_mode(&self, reason: &str) -> Result<bool, GovernorError> {
        let now = self.clock.now_secs();
        let mut inner = self.inner.lock().map_err(|_| GovernorError::LockPoisoned)?;
        if inner.state == SafeModeState::Normal {
            return Ok(false);
        }
        tracing::info!(reason = %reason, "safe mode deactivated: evolution resumed");
        Self::transition(&mut inner, SafeModeState::Normal, reason, now);
        Ok(true)
    }

    /// Poll the detector and enter safe mode if any anomaly is unresolved.
    ///
    /// Never leaves safe mode on its own: anomalies clearing up is not the
    /// same as someone having reviewed them.
    ///
    /// # Errors
    /// Returns [`GovernorError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn enforce_policies(&self) -> Result<PolicyReport, GovernorError> {
        let unresolved = self.detector.unresolved();
        let now = self.clock.now_secs();

        let mut inner = self.inner.lock().map_err(|_| GovernorError::LockPoisoned)?;
        let mut state_changed = false;
        if !unresolved.is_empty() && inner.state == SafeModeState::Normal {
            let mut metrics: Vec<&str> = unresolved.iter().map(|a| a.metric.as_str()).collect();
            metrics.sort_unstable();
            metrics.dedup();
            let worst = unresolved
                .iter()
                .map(|a| a.severity)
                .max()
                .unwrap_or(Severity::Warning);
            let reason = format!(
                "{} unresolved anomalies (worst: {}) on: {}",
                unresolved.len(),
                worst,
                metrics.join(", ")
            );
            tracing::warn!(
                unresolved = unresolved.len(),
                reason = %reason,
                "safe mode activated: evolution halted"
            );
            Self::transition(&mut inner, SafeModeState::SafeMode, &reason, now);
            state_changed = true;
        }

        Ok(PolicyReport {
            unresolved_anomalies: unresolved.len(),
            state: inner.state,
            state_changed,
            checked_at_secs: now,
        })
    }

    /// Transition audit trail, oldest first. Returns an empty list if the
    /// lock is poisoned.
    pub fn transitions(&self) -> Vec<SafeModeTransition> {
        self.inner
            .lock()
            .map(|inner| inner.transitions.clone())
            .unwrap_or_default()
    }

    // ── Private helpers ──────────────────────────────────────────────────

    fn transition(inner: &mut GovernorInner, to: SafeModeState, reason: &str, now: u64) {
        let record = SafeModeTransition {
            from: inner.state,
            to,
            reason: reason.to_string(),
            at_secs: now,
        };
        inner.state = to;
        inner.transitions.push(record);
        Self::cap_transitions(inner);
    }

    fn cap_transitions(inner: &mut GovernorInner) {
        let cap = inner.config.max_transitions.max(1);
        if inner.transitions.len() > cap {
            let excess = inner.transitions.len() - cap;
            inner.transitions.drain(..excess);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────
