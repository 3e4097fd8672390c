//! # Evaluator Interfaces
//!
//! ## Responsibility
//! Define the capability seams the optimizer consumes but does not own:
//! fitness scoring and safety validation, both pluggable per component
//! category, plus the category-keyed lookup table that holds them.
//!
//! ## Guarantees
//! - Lookup is by explicit category key, never by naming convention
//! - Registering a category twice replaces the previous implementation
//! - Implementations are shared as `Arc<dyn …>` so evaluation can fan out
//!   across workers without cloning user state
//!
//! ## NOT Responsible For
//! - Running evaluations, timeouts, or fault handling (see [`super::manager`])
//! - Deciding which checks are required: every named check is required

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::genome::ComponentGenome;

// ─── Error ───────────────────────────────────────────────────────────────

/// Errors produced by the evaluator registry.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// Internal lock poisoned.
    #[error("evaluator registry lock poisoned")]
    LockPoisoned,
}

// ─── Capability traits ───────────────────────────────────────────────────

/// Pluggable fitness function: scores a genome in `[0, 1]`, higher is
/// better. Implementations should be pure with respect to the genome so
/// scores can be memoized by genome hash.
pub trait FitnessEvaluator: Send + Sync {
    /// Score the genome. Return `Err(description)` on an evaluator fault;
    /// the fault is recorded against the candidate, not propagated raw.
    fn evaluate(&self, genome: &ComponentGenome) -> Result<f64, String>;
}

/// Pluggable safety function: maps a genome to a named set of pass/fail
/// checks. A candidate failing any check is excluded from selection
/// entirely, never merely penalized.
pub trait SafetyValidator: Send + Sync {
    /// Run all checks against the genome. Return `Err(description)` on a
    /// validator fault (distinct from a failing check).
    fn validate(&self, genome: &ComponentGenome) -> Result<SafetyReport, String>;
}

impl<F> FitnessEvaluator for F
where
    F: Fn(&ComponentGenome) -> Result<f64, String> + Send + Sync,
{
    fn evaluate(&self, genome: &ComponentGenome) -> Result<f64, String> {
        self(genome)
    }
}

impl<F> SafetyValidator for F
where
    F: Fn(&ComponentGenome) -> Result<SafetyReport, String> + Send + Sync,
{
    fn validate(&self, genome: &ComponentGenome) -> Result<SafetyReport, String> {
        self(genome)
    }
}

/// Wrap a plain function or closure as a shareable fitness evaluator.
pub fn fitness_fn<F>(f: F) -> Arc<dyn FitnessEvaluator>
where
    F: Fn(&ComponentGenome) -> Result<f64, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a plain function or closure as a shareable safety validator.
pub fn safety_fn<F>(f: F) -> Arc<dyn SafetyValidator>
where
    F: Fn(&ComponentGenome) -> Result<SafetyReport, String> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ─── Safety report ───────────────────────────────────────────────────────

/// Named pass/fail checks for one candidate genome.
///
/// An empty report passes: a validator with nothing to object to is a
/// clean bill of health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    /// Check results keyed by check name. All named checks are required.
    pub checks: BTreeMap<String, bool>,
}

impl SafetyReport {
    /// Create an empty (passing) report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: record a check result and return the report.
    #[must_use]
    pub fn with_check(mut self, name: impl Into<String>, passed: bool) -> Self {
        self.checks.insert(name.into(), passed);
        self
    }

    /// Record a check result.
    pub fn record(&mut self, name: impl Into<String>, passed: bool) {
        self.checks.insert(name.into(), passed);
    }

    /// `true` when every named check passed.
    pub fn passed(&self) -> bool {
        self.checks.values().all(|&ok| ok)
    }

    /// Names of failed checks, in sorted order.
    pub fn failed_checks(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|(_, &ok)| !ok)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// ─── Category-keyed lookup table ─────────────────────────────────────────

#[derive(Default)]
struct EvaluatorsInner {
    fitness: HashMap<String, Arc<dyn FitnessEvaluator>>,
    safety: HashMap<String, Arc<dyn SafetyValidator>>,
}

/// Category-keyed table of fitness evaluators and safety validators.
///
/// Cheap to clone — all clones share the same inner state via `Arc<Mutex<_>>`.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    inner: Arc<Mutex<EvaluatorsInner>>,
}

impl EvaluatorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the fitness evaluator for a component category, replacing
    /// any previous one.
    ///
    /// # Errors
    /// Returns [`EvaluatorError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn register_fitness(
        &self,
        category: impl Into<String>,
        evaluator: Arc<dyn FitnessEvaluator>,
    ) -> Result<(), EvaluatorError> {
        let category = category.into();
        let mut inner = self.inner.lock().map_err(|_| EvaluatorError::LockPoisoned)?;
        tracing::info!(category = %category, "fitness evaluator registered");
        inner.fitness.insert(category, evaluator);
        Ok(())
    }

    /// Register the safety validator for a component category, replacing
    /// any previous one.
    ///
    /// # Errors
    /// Returns [`EvaluatorError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn register_safety(
        &self,
        category: impl Into<String>,
        validator: Arc<dyn SafetyValidator>,
    ) -> Result<(), EvaluatorError> {
        let category = category.into();
        let mut inner = self.inner.lock().map_err(|_| EvaluatorError::LockPoisoned)?;
        tracing::info!(category = %category, "safety validator registered");
        inner.safety.insert(category, validator);
        Ok(())
    }

    /// Look up the fitness evaluator for a category.
    ///
    /// # Errors
    /// Returns [`EvaluatorError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn fitness_for(
        &self,
        category: &str,
    ) -> Result<Option<Arc<dyn FitnessEvaluator>>, EvaluatorError> {
        let inner = self.inner.lock().map_err(|_| EvaluatorError::LockPoisoned)?;
        Ok(inner.fitness.get(category).cloned())
    }

    /// Look up the safety validator for a category.
    ///
    /// # Errors
    /// Returns [`EvaluatorError::LockPoisoned`] if the internal lock is
    /// poisoned.
    pub fn safety_for(
        &self,
        category: &str,
    ) -> Result<Option<Arc<dyn SafetyValidator>>, EvaluatorError> {
        let inner = self.inner.lock().map_err(|_| EvaluatorError::LockPoisoned)?;
        Ok(inner.safety.get(category).cloned())
    }

    /// Categories with a registered fitness evaluator, sorted. Returns an
    /// empty list if the lock is poisoned.
    pub fn fitness_categories(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(inner) => {
                let mut names: Vec<String> = inner.fitness.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────
