//! # Optimizer Facade
//!
//! ## Responsibility
//! Bundle the genome registry, anomaly detector, evaluator registry,
//! governor and evolution manager into one context object carrying the
//! crate's whole public surface.
//!
//! ## Guarantees
//! - No global state: every [`Optimizer`] is a fully isolated instance, so
//!   tests can run many side by side
//! - All subsystems share one clock, one registry and one safe-mode flag;
//!   a cloned handle observes the same state
//! - [`run_cycle`](Optimizer::run_cycle) enforces governor policies before
//!   evolving, so a fresh anomaly blocks the cycle it would have tainted
//!
//! ## NOT Responsible For
//! - Scheduling: callers decide when to record metrics and when to evolve
//! - Serialization: every record derives serde; callers own the wire format

use std::sync::Arc;

use crate::{
    clock::{Clock, SystemClock},
    config::{ConfigError, OptimizerConfig},
    evolution::{
        EvaluatorError, EvaluatorRegistry, EvolutionCycle, EvolutionManager, EvolveError,
        FitnessEvaluator, SafetyValidator,
    },
    genome::{ComponentGenome, GenomeRegistry, RegistryError},
    governor::{EvolutionGovernor, GovernorError, PolicyReport, SafeModeTransition},
    telemetry::{Anomaly, AnomalyDetector, AnomalyFilter, DetectorError, MetricStats},
};

/// The self-tuning optimizer: one object, the whole surface.
///
/// Construct from an [`OptimizerConfig`] (optionally with a fixed RNG seed
/// and an injected clock), register component genomes and per-category
/// evaluators, feed it metrics, and drive evolution cycles.
///
/// Cheap to clone — clones are handles onto the same instance.
#[derive(Clone)]
pub struct Optimizer {
    config: OptimizerConfig,
    registry: GenomeRegistry,
    detector: AnomalyDetector,
    evaluators: EvaluatorRegistry,
    governor: EvolutionGovernor,
    manager: EvolutionManager,
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Optimizer {
    /// Create an optimizer on the system clock with the default RNG seed.
    pub fn new(config: OptimizerConfig) -> Self {
        Self::with_clock(config, 42, Arc::new(SystemClock))
    }

    /// Create an optimizer on the system clock with a fixed RNG seed.
    pub fn with_seed(config: OptimizerConfig, seed: u64) -> Self {
        Self::with_clock(config, seed, Arc::new(SystemClock))
    }

    /// Create an optimizer with full control over seed and time source.
    pub fn with_clock(config: OptimizerConfig, seed: u64, clock: Arc<dyn Clock>) -> Self {
        let registry = GenomeRegistry::new();
        let evaluators = EvaluatorRegistry::new();
        let detector = AnomalyDetector::new(config.detector.clone(), clock.clone());
        let governor =
            EvolutionGovernor::new(config.governor.clone(), detector.clone(), clock.clone());
        let manager = EvolutionManager::with_seed(
            config.evolution.clone(),
            registry.clone(),
            evaluators.clone(),
            governor.clone(),
            clock,
            seed,
        );
        Self {
            config,
            registry,
            detector,
            evaluators,
            governor,
            manager,
        }
    }

    /// Parse, validate and build from a TOML document.
    ///
    /// # Errors
    /// Returns the parse or validation failure; see
    /// [`OptimizerConfig::from_toml_str`].
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(OptimizerConfig::from_toml_str(toml)?))
    }

    /// The configuration this instance was built from.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    // ── Genomes ──────────────────────────────────────────────────────────

    /// Register `genome` as the current configuration for its component.
    ///
    /// Re-registering overwrites and returns the previous genome.
    ///
    /// # Errors
    /// Returns [`RegistryError::LockPoisoned`] if the registry lock is
    /// poisoned.
    pub fn register(
        &self,
        genome: ComponentGenome,
    ) -> Result<Option<ComponentGenome>, RegistryError> {
        self.registry.register(genome)
    }

    /// The active genome for a component.
    ///
    /// # Errors
    /// Returns [`RegistryError::ComponentNotRegistered`] for an unknown id.
    pub fn current(&self, component_id: &str) -> Result<ComponentGenome, RegistryError> {
        self.registry.current(component_id)
    }

    /// Full ancestry for a component, earliest first, current genome last.
    ///
    /// # Errors
    /// Returns [`RegistryError::ComponentNotRegistered`] for an unknown id.
    pub fn lineage(&self, component_id: &str) -> Result<Vec<ComponentGenome>, RegistryError> {
        self.registry.lineage(component_id)
    }

    /// All registered component ids, sorted.
    pub fn components(&self) -> Vec<String> {
        self.registry.components()
    }

    /// Whether a component id is registered.
    pub fn contains(&self, component_id: &str) -> bool {
        self.registry.contains(component_id)
    }

    // ── Evaluators ───────────────────────────────────────────────────────

    /// Register the fitness evaluator for a category, replacing any
    /// previous one.
    ///
    /// # Errors
    /// Returns [`EvaluatorError::LockPoisoned`] if the evaluator lock is
    /// poisoned.
    pub fn register_fitness_evaluator(
        &self,
        category: impl Into<String>,
        evaluator: Arc<dyn FitnessEvaluator>,
    ) -> Result<(), EvaluatorError> {
        self.evaluators.register_fitness(category, evaluator)
    }

    /// Register the safety validator for a category, replacing any
    /// previous one.
    ///
    /// # Errors
    /// Returns [`EvaluatorError::LockPoisoned`] if the evaluator lock is
    /// poisoned.
    pub fn register_safety_validator(
        &self,
        category: impl Into<String>,
        validator: Arc<dyn SafetyValidator>,
    ) -> Result<(), EvaluatorError> {
        self.evaluators.register_safety(category, validator)
    }

    // ── Telemetry ────────────────────────────────────────────────────────

    /// Record one metric reading; returns the anomaly it triggered, if any.
    ///
    /// # Errors
    /// Returns [`DetectorError::NonFiniteSample`] for NaN or infinite
    /// values.
    pub fn record_metric(
        &self,
        metric: &str,
        value: f64,
        context: Option<String>,
    ) -> Result<Option<Anomaly>, DetectorError> {
        self.detector.record(metric, value, context)
    }

    /// Record a batch of readings; returns every anomaly triggered.
    ///
    /// # Errors
    /// Returns [`DetectorError::NonFiniteSample`] if any value is NaN or
    /// infinite; nothing is recorded in that case.
    pub fn record_batch(&self, readings: &[(String, f64)]) -> Result<Vec<Anomaly>, DetectorError> {
        self.detector.record_batch(readings)
    }

    /// Summary statistics for a metric's current window, or `None` if it
    /// has no samples.
    pub fn stats(&self, metric: &str) -> Option<MetricStats> {
        self.detector.stats(metric)
    }

    /// Anomalies matching `filter`, newest first.
    pub fn recent_anomalies(&self, filter: &AnomalyFilter) -> Vec<Anomaly> {
        self.detector.anomalies(filter)
    }

    /// All unresolved anomalies, newest first.
    pub fn unresolved_anomalies(&self) -> Vec<Anomaly> {
        self.detector.unresolved()
    }

    /// Mark an anomaly resolved. Idempotent: `false` for an unknown or
    /// already-resolved id.
    ///
    /// # Errors
    /// Returns [`DetectorError::LockPoisoned`] if the detector lock is
    /// poisoned.
    pub fn resolve_anomaly(&self, anomaly_id: &str) -> Result<bool, DetectorError> {
        self.detector.resolve(anomaly_id)
    }

    // ── Evolution ────────────────────────────────────────────────────────

    /// Run one evolution cycle, honoring safe mode.
    ///
    /// # Errors
    /// See [`EvolutionManager::evolve_with_override`].
    pub async fn evolve(
        &self,
        component_id: &str,
        target_metric: Option<&str>,
        target_improvement: Option<f64>,
    ) -> Result<EvolutionCycle, EvolveError> {
        self.manager
            .evolve(component_id, target_metric, target_improvement)
            .await
    }

    /// Run one evolution cycle, optionally bypassing safe mode.
    ///
    /// # Errors
    /// See [`EvolutionManager::evolve_with_override`].
    pub async fn evolve_with_override(
        &self,
        component_id: &str,
        target_metric: Option<&str>,
        target_improvement: Option<f64>,
        override_safe_mode: bool,
    ) -> Result<EvolutionCycle, EvolveError> {
        self.manager
            .evolve_with_override(
                component_id,
                target_metric,
                target_improvement,
                override_safe_mode,
            )
            .await
    }

    /// The scheduler entry point: enforce governor policies, then run one
    /// evolution cycle.
    ///
    /// A reading that just pushed a metric out of band engages safe mode
    /// here, and the cycle that would have tuned against the tainted
    /// telemetry fails fast instead.
    ///
    /// # Errors
    /// [`EvolveError::SafeModeActive`] when enforcement (now or earlier)
    /// has evolution halted; otherwise as
    /// [`EvolutionManager::evolve_with_override`].
    pub async fn run_cycle(
        &self,
        component_id: &str,
        target_metric: Option<&str>,
        target_improvement: Option<f64>,
    ) -> Result<EvolutionCycle, EvolveError> {
        self.governor
            .enforce_policies()
            .map_err(|_| EvolveError::LockPoisoned)?;
        self.manager
            .evolve(component_id, target_metric, target_improvement)
            .await
    }

    /// Cycle history, optionally filtered to one component, oldest first.
    pub fn history(&self, component_id: Option<&str>) -> Vec<EvolutionCycle> {
        self.manager.history(component_id)
    }

    /// The most recent cycle for a component, if any.
    pub fn latest_cycle(&self, component_id: &str) -> Option<EvolutionCycle> {
        self.manager.latest_cycle(component_id)
    }

    /// Look up a cycle by id.
    pub fn cycle(&self, cycle_id: &str) -> Option<EvolutionCycle> {
        self.manager.cycle(cycle_id)
    }

    // ── Governor ─────────────────────────────────────────────────────────

    /// Poll the detector and engage safe mode if any anomaly is unresolved.
    ///
    /// # Errors
    /// Returns [`GovernorError::LockPoisoned`] if the governor lock is
    /// poisoned.
    pub fn enforce_policies(&self) -> Result<PolicyReport, GovernorError> {
        self.governor.enforce_policies()
    }

    /// Manually enter safe mode. Idempotent.
    ///
    /// # Errors
    /// Returns [`GovernorError::LockPoisoned`] if the governor lock is
    /// poisoned.
    pub fn activate_safe_mode(&self, reason: &str) -> Result<bool, GovernorError> {
        self.governor.activate_safe_mode(reason)
    }

    /// Leave safe mode after review. Idempotent.
    ///
    /// # Errors
    /// Returns [`GovernorError::LockPoisoned`] if the governor lock is
    /// poisoned.
    pub fn deactivate_safe_mode(&self, reason: &str) -> Result<bool, GovernorError> {
        self.governor.deactivate_safe_mode(reason)
    }

    /// Whether evolution is currently halted.
    pub fn is_safe_mode_active(&self) -> bool {
        self.governor.is_safe_mode_active()
    }

    /// Safe-mode transition audit trail, oldest first.
    pub fn safe_mode_transitions(&self) -> Vec<SafeModeTransition> {
        self.governor.transitions()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────
