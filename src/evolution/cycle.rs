//! # Evolution Cycle Records
//!
//! ## Responsibility
//! Define the per-cycle audit record: status state machine, candidate
//! pool, fitness and safety results, faults, and timing.
//!
//! ## Guarantees
//! - Records are plain serializable data; any wrapper owns its own wire
//!   format
//! - Map keys are genome hashes, so results survive candidate reordering
//! - Once a terminal status is reached the record is never mutated again
//!   (enforced by the manager, which owns the append-only history)
//!
//! ## NOT Responsible For
//! - Driving the state machine (see [`super::manager`])

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::genome::ComponentGenome;

use super::evaluators::SafetyReport;

// ─── Status ──────────────────────────────────────────────────────────────

/// Lifecycle state of one optimization cycle.
///
/// `Pending → Evaluating → {Approved, Rejected} → Deployed` on the happy
/// path; `Failed` on a baseline fault or a deployment conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Created, population not yet built.
    Pending,
    /// Candidates are being scored and validated.
    Evaluating,
    /// A winner beat the acceptance bar; deployment may follow.
    Approved,
    /// No candidate beat the acceptance bar; registry unchanged.
    Rejected,
    /// The approved winner was installed in the registry.
    Deployed,
    /// Baseline fault or deployment conflict; registry unchanged.
    Failed,
}

impl CycleStatus {
    /// `true` once the cycle can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CycleStatus::Approved
                | CycleStatus::Rejected
                | CycleStatus::Deployed
                | CycleStatus::Failed
        )
    }

    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Pending => "pending",
            CycleStatus::Evaluating => "evaluating",
            CycleStatus::Approved => "approved",
            CycleStatus::Rejected => "rejected",
            CycleStatus::Deployed => "deployed",
            CycleStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Faults ──────────────────────────────────────────────────────────────

/// Where a candidate fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStage {
    /// The fitness evaluator returned an error or panicked.
    Evaluation,
    /// The safety validator returned an error or panicked.
    Validation,
    /// The candidate's evaluation exceeded the configured timeout.
    Timeout,
}

impl FaultStage {
    /// Stable lowercase name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultStage::Evaluation => "evaluation",
            FaultStage::Validation => "validation",
            FaultStage::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for FaultStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fault recorded against one candidate during a cycle.
///
/// Faults carry the message text only, never a full trace; they exist for
/// later audit, not for debugging the evaluator in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFault {
    /// Hash of the candidate the fault was raised against.
    pub genome_hash: String,
    /// Pipeline stage where the fault occurred.
    pub stage: FaultStage,
    /// Fault description as reported by the evaluator or validator.
    pub message: String,
}

// ─── Cycle record ────────────────────────────────────────────────────────

/// Full audit record for one optimization cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionCycle {
    /// Unique cycle id.
    pub cycle_id: String,
    /// Component this cycle optimized.
    pub component_id: String,
    /// Current lifecycle state.
    pub status: CycleStatus,
    /// The genome in force when the cycle began (elitism baseline).
    pub baseline: ComponentGenome,
    /// Metric this optimization was aimed at, when the caller named one.
    /// Audit-only; selection is driven by fitness.
    pub target_metric: Option<String>,
    /// Minimum fitness improvement over the baseline required to approve.
    /// `None` means any strict improvement qualifies.
    pub target_improvement: Option<f64>,
    /// Every candidate produced, baseline in slot 0.
    pub candidates: Vec<ComponentGenome>,
    /// Fitness by genome hash. Candidates excluded by fault or timeout
    /// have no entry.
    pub fitness_scores: BTreeMap<String, f64>,
    /// Safety check results by genome hash.
    pub safety_reports: BTreeMap<String, SafetyReport>,
    /// Faults recorded against individual candidates.
    pub faults: Vec<CandidateFault>,
    /// Hash of the selected winner, when selection produced one. Present
    /// on rejected cycles too, for audit.
    pub winner_hash: Option<String>,
    /// Why the cycle was rejected or failed.
    pub failure_reason: Option<String>,
    /// Unix timestamp when the cycle began.
    pub started_at_secs: u64,
    /// Unix timestamp when a terminal status was reached.
    pub completed_at_secs: Option<u64>,
}

impl EvolutionCycle {
    /// Create a fresh pending cycle for a component.
    pub fn new(
        component_id: impl Into<String>,
        baseline: ComponentGenome,
        started_at_secs: u64,
    ) -> Self {
        Self {
            cycle_id: uuid::Uuid::new_v4().to_string(),
            component_id: component_id.into(),
            status: CycleStatus::Pending,
            baseline,
            target_metric: None,
            target_improvement: None,
            candidates: Vec::new(),
            fitness_scores: BTreeMap::new(),
            safety_reports: BTreeMap::new(),
            faults: Vec::new(),
            winner_hash: None,
            failure_reason: None,
            started_at_secs,
            completed_at_secs: None,
        }
    }

    /// Fitness recorded for a genome hash, if it was evaluated.
    pub fn fitness_of(&self, genome_hash: &str) -> Option<f64> {
        self.fitness_scores.get(genome_hash).copied()
    }

    /// Safety report recorded for a genome hash, if it was validated.
    pub fn safety_of(&self, genome_hash: &str) -> Option<&SafetyReport> {
        self.safety_reports.get(genome_hash)
    }

    /// The winning candidate record, if a winner was selected.
    pub fn winner(&self) -> Option<&ComponentGenome> {
        let hash = self.winner_hash.as_deref()?;
        self.candidates.iter().find(|c| c.hash() == hash)
    }

    /// Wall-clock duration, once the cycle has completed.
    pub fn duration_secs(&self) -> Option<u64> {
        self.completed_at_secs
            .map(|end| end.saturating_sub(self.started_at_secs))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────
