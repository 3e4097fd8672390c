//! # Evolution Manager
//!
//! ## Responsibility
//! Drive one optimization cycle end to end: build a population around the
//! current genome, fan candidate evaluation out to a bounded worker pool,
//! select a winner, decide acceptance, and (when configured) deploy the
//! winner through the registry's compare-and-swap.
//!
//! ## Guarantees
//! - Slot 0 of every population is the unchanged current genome, so the
//!   incumbent always competes (elitism)
//! - Fitness results are memoized by genome hash within a cycle; identical
//!   candidates are never re-evaluated
//! - A fault or timeout on one candidate excludes only that candidate; a
//!   fault on the baseline fails the whole cycle
//! - A rejected or failed cycle leaves the registry untouched
//! - Every cycle, terminal in any state, lands in the append-only history
//!
//! ## NOT Responsible For
//! - Scoring genomes (injected via [`super::evaluators`])
//! - Deciding whether evolution is allowed (see [`crate::governor`])

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use thiserror::Error;
use tokio::sync::Semaphore;

use crate::{
    clock::Clock,
    config::EvolutionConfig,
    genome::{ComponentGenome, GenomeRegistry, RegistryError},
    governor::EvolutionGovernor,
};

use super::{
    cycle::{CandidateFault, CycleStatus, EvolutionCycle, FaultStage},
    evaluators::{EvaluatorRegistry, FitnessEvaluator, SafetyReport, SafetyValidator},
    operators::{self, XorShiftRng},
};

// ─── Error ───────────────────────────────────────────────────────────────

/// Preconditions that stop a cycle before it produces a record.
///
/// Everything that happens *after* a cycle starts (faults, rejection,
/// deployment conflicts) is captured in the returned [`EvolutionCycle`]
/// instead.
#[derive(Debug, Error)]
pub enum EvolveError {
    /// Internal lock poisoned.
    #[error("evolution manager lock poisoned")]
    LockPoisoned,

    /// The governor has evolution halted and no override was given.
    #[error("safe mode active: evolution is disabled pending anomaly review")]
    SafeModeActive,

    /// No current genome exists for the component.
    #[error("component not registered: {0}")]
    ComponentNotRegistered(String),

    /// No fitness evaluator is registered for the component's category.
    #[error("no fitness evaluator registered for category '{0}'")]
    EvaluatorNotRegistered(String),
}

// ─── Manager ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ManagerInner {
    config: EvolutionConfig,
    rng: XorShiftRng,
    history: Vec<EvolutionCycle>,
}

/// Orchestrates evolution cycles over the shared registry.
///
/// Cheap to clone — all clones share the same inner state via `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct EvolutionManager {
    inner: Arc<Mutex<ManagerInner>>,
    registry: GenomeRegistry,
    evaluators: EvaluatorRegistry,
    governor: EvolutionGovernor,
    clock: Arc<dyn Clock>,
}

impl EvolutionManager {
    /// Create a manager with the default RNG seed.
    pub fn new(
        config: EvolutionConfig,
        registry: GenomeRegistry,
        evaluators: EvaluatorRegistry,
        governor: EvolutionGovernor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_seed(config, registry, evaluators, governor, clock, 42)
    }

    /// Create a manager with a specific RNG seed for reproducibility.
    pub fn with_seed(
        config: EvolutionConfig,
        registry: GenomeRegistry,
        evaluators: EvaluatorRegistry,
        governor: EvolutionGovernor,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManagerInner {
                config,
                rng: XorShiftRng::new(seed),
                history: Vec::new(),
            })),
            registry,
            evaluators,
            governor,
            clock,
        }
    }

    /// Run one evolution cycle for a component, honoring safe mode.
    ///
    /// See [`EvolutionManager::evolve_with_override`] for the algorithm and
    /// error contract.
    ///
    /// # Errors
    /// As for [`EvolutionManager::evolve_with_override`].
    pub async fn evolve(
        &self,
        component_id: &str,
        target_metric: Option<&str>,
        target_improvement: Option<f64>,
    ) -> Result<EvolutionCycle, EvolveError> {
        self.evolve_with_override(component_id, target_metric, target_improvement, false)
            .await
    }

    /// Run one evolution cycle for a component.
    ///
    /// Builds a population of `population_size` candidates (slot 0 is the
    /// unchanged current genome), scores and validates them on a bounded
    /// worker pool, selects the best safety-passing candidate (ties broken
    /// by lower generation, then hash), and approves the cycle only if the
    /// winner improves on the baseline by at least `target_improvement`
    /// (any strict improvement when `None`). Approved cycles deploy the
    /// winner when auto-deploy is enabled, guarded by a compare-and-swap on
    /// the genome that was current at cycle start.
    ///
    /// With `override_safe_mode` set, the cycle runs even while the
    /// governor has evolution halted.
    ///
    /// # Errors
    /// - [`EvolveError::SafeModeActive`] if safe mode is on and no override
    ///   was given.
    /// - [`EvolveError::ComponentNotRegistered`] on a registry lookup miss.
    /// - [`EvolveError::EvaluatorNotRegistered`] if the component's
    ///   category has no fitness evaluator.
    /// - [`EvolveError::LockPoisoned`] if an internal lock is poisoned.
    ///
    /// Rejected and failed cycles are `Ok`: the cycle record carries the
    /// outcome.
    pub async fn evolve_with_override(
        &self,
        component_id: &str,
        target_metric: Option<&str>,
        target_improvement: Option<f64>,
        override_safe_mode: bool,
    ) -> Result<EvolutionCycle, EvolveError> {
        if !override_safe_mode && self.governor.is_safe_mode_active() {
            tracing::warn!(component_id, "evolve blocked: safe mode active");
            return Err(EvolveError::SafeModeActive);
        }

        let baseline = self.registry.current(component_id).map_err(|e| match e {
            RegistryError::ComponentNotRegistered(id) => EvolveError::ComponentNotRegistered(id),
            _ => EvolveError::LockPoisoned,
        })?;
        let baseline_hash = baseline.hash();

        let evaluator = self
            .evaluators
            .fitness_for(&baseline.category)
            .map_err(|_| EvolveError::LockPoisoned)?
            .ok_or_else(|| EvolveError::EvaluatorNotRegistered(baseline.category.clone()))?;
        // A category without a validator validates vacuously: no checks, no
        // safety report, nothing to fail.
        let validator = self
            .evaluators
            .safety_for(&baseline.category)
            .map_err(|_| EvolveError::LockPoisoned)?;

        let lineage = self.registry.lineage(component_id).map_err(|e| match e {
            RegistryError::ComponentNotRegistered(id) => EvolveError::ComponentNotRegistered(id),
            _ => EvolveError::LockPoisoned,
        })?;

        let started = self.clock.now_secs();
        let mut cycle = EvolutionCycle::new(component_id, baseline.clone(), started);
        cycle.target_metric = target_metric.map(ToString::to_string);
        cycle.target_improvement = target_improvement;

        let config = {
            let mut inner = self.inner.lock().map_err(|_| EvolveError::LockPoisoned)?;
            let config = inner.config.clone();
            cycle.candidates =
                build_population(&baseline, &lineage, &config, &mut inner.rng, started);
            config
        };
        cycle.status = CycleStatus::Evaluating;
        tracing::debug!(
            component_id,
            cycle_id = %cycle.cycle_id,
            candidates = cycle.candidates.len(),
            "population built, evaluating"
        );

        let eval_timeout = Duration::from_millis(config.evaluation_timeout_ms);
        let mut results: BTreeMap<String, (f64, Option<SafetyReport>)> = BTreeMap::new();

        // The baseline is scored first, inline: a fault here means the
        // evaluator or validator itself is broken, and the cycle aborts.
        match evaluate_with_timeout(
            evaluator.clone(),
            validator.clone(),
            baseline.clone(),
            eval_timeout,
        )
        .await
        {
            Ok(scored) => {
                results.insert(baseline_hash.clone(), scored);
            }
            Err(fault) => {
                tracing::error!(
                    component_id,
                    stage = %fault.stage,
                    message = %fault.message,
                    "baseline fault, cycle failed"
                );
                cycle.failure_reason = Some(format!(
                    "baseline fault during {}: {}",
                    fault.stage, fault.message
                ));
                cycle.faults.push(fault);
                cycle.status = CycleStatus::Failed;
                return self.finish(cycle);
            }
        }

        // Fan the remaining unique candidates out to the worker pool.
        let mut unique: Vec<(String, ComponentGenome)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(baseline_hash.clone());
        for candidate in cycle.candidates.iter().skip(1) {
            let hash = candidate.hash();
            if seen.insert(hash.clone()) {
                unique.push((hash, candidate.clone()));
            }
        }

        let semaphore = Arc::new(Semaphore::new(config.evaluation_concurrency()));
        let mut handles = Vec::with_capacity(unique.len());
        for (hash, genome) in unique {
            let semaphore = semaphore.clone();
            let evaluator = evaluator.clone();
            let validator = validator.clone();
            let task_hash = hash.clone();
            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Err(CandidateFault {
                        genome_hash: task_hash,
                        stage: FaultStage::Evaluation,
                        message: "worker pool unavailable".to_string(),
                    });
                };
                evaluate_with_timeout(evaluator, validator, genome, eval_timeout).await
            });
            handles.push((hash, handle));
        }

        for (hash, handle) in handles {
            match handle.await {
                Ok(Ok(scored)) => {
                    results.insert(hash, scored);
                }
                Ok(Err(fault)) => {
                    tracing::debug!(
                        component_id,
                        candidate = %&hash[..12.min(hash.len())],
                        stage = %fault.stage,
                        message = %fault.message,
                        "candidate excluded"
                    );
                    cycle.faults.push(fault);
                }
                Err(join_err) => {
                    cycle.faults.push(CandidateFault {
                        genome_hash: hash,
                        stage: FaultStage::Evaluation,
                        message: format!("evaluation task failed: {join_err}"),
                    });
                }
            }
        }

        for (hash, (fitness, report)) in &results {
            cycle.fitness_scores.insert(hash.clone(), *fitness);
            if let Some(report) = report {
                cycle.safety_reports.insert(hash.clone(), report.clone());
            }
        }

        // Selection: highest fitness among safety-passing candidates.
        let mut ranked: Vec<(f64, u64, String)> = Vec::new();
        let mut ranked_seen: HashSet<String> = HashSet::new();
        for candidate in &cycle.candidates {
            let hash = candidate.hash();
            if !ranked_seen.insert(hash.clone()) {
                continue;
            }
            let Some((fitness, report)) = results.get(&hash) else {
                continue;
            };
            if let Some(report) = report {
                if !report.passed() {
                    continue;
                }
            }
            ranked.push((*fitness, candidate.generation, hash));
        }

        let Some((winner_fitness, _, winner_hash)) = select_winner(ranked) else {
            cycle.status = CycleStatus::Rejected;
            cycle.failure_reason = Some(
                "no eligible candidates: every candidate faulted or failed safety checks"
                    .to_string(),
            );
            return self.finish(cycle);
        };
        cycle.winner_hash = Some(winner_hash.clone());

        // Acceptance is anchored on the baseline's fitness as measured in
        // this cycle, not on any score stored with the genome.
        let baseline_fitness = results
            .get(&baseline_hash)
            .map(|(fitness, _)| *fitness)
            .unwrap_or(0.0);
        let improvement = winner_fitness - baseline_fitness;
        let approved = match target_improvement {
            Some(target) => improvement >= target,
            None => improvement > 0.0,
        };

        if !approved {
            cycle.status = CycleStatus::Rejected;
            cycle.failure_reason = Some(match target_improvement {
                Some(target) => {
                    format!("improvement {improvement:.4} below target {target:.4}")
                }
                None => format!(
                    "winner fitness {winner_fitness:.4} did not improve on baseline {baseline_fitness:.4}"
                ),
            });
            return self.finish(cycle);
        }

        cycle.status = CycleStatus::Approved;
        tracing::info!(
            component_id,
            cycle_id = %cycle.cycle_id,
            winner = %&winner_hash[..12.min(winner_hash.len())],
            fitness = winner_fitness,
            improvement,
            "cycle approved"
        );

        if config.auto_deploy {
            if let Some(winner_genome) = cycle.winner().cloned() {
                let deployed = winner_genome.with_fitness(winner_fitness);
                match self.registry.install(component_id, &baseline_hash, deployed) {
                    Ok(installed) => {
                        cycle.status = CycleStatus::Deployed;
                        tracing::info!(
                            component_id,
                            genome = %installed.short_hash(),
                            version = installed.version,
                            "winner deployed"
                        );
                    }
                    Err(RegistryError::ConcurrentModification {
                        expected, actual, ..
                    }) => {
                        cycle.status = CycleStatus::Failed;
                        cycle.failure_reason = Some(format!(
                            "deployment conflict: registry changed during the cycle \
                             (expected {expected}, found {actual})"
                        ));
                        tracing::warn!(component_id, "deployment conflict, cycle failed");
                    }
                    Err(RegistryError::ComponentNotRegistered(id)) => {
                        cycle.status = CycleStatus::Failed;
                        cycle.failure_reason =
                            Some(format!("deployment failed: component '{id}' was removed"));
                    }
                    Err(RegistryError::LockPoisoned) => return Err(EvolveError::LockPoisoned),
                }
            }
        }

        self.finish(cycle)
    }

    /// Cycle history, optionally filtered to one component, oldest first.
    /// Returns an empty list if the lock is poisoned.
    pub fn history(&self, component_id: Option<&str>) -> Vec<EvolutionCycle> {
        match self.inner.lock() {
            Ok(inner) => inner
                .history
                .iter()
                .filter(|c| component_id.map_or(true, |id| c.component_id == id))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// The most recent cycle for a component, if any. Returns `None` if the
    /// lock is poisoned.
    pub fn latest_cycle(&self, component_id: &str) -> Option<EvolutionCycle> {
        self.inner.lock().ok().and_then(|inner| {
            inner
                .history
                .iter()
                .rev()
                .find(|c| c.component_id == component_id)
                .cloned()
        })
    }

    /// Look up a cycle by id. Returns `None` if the lock is poisoned.
    pub fn cycle(&self, cycle_id: &str) -> Option<EvolutionCycle> {
        self.inner.lock().ok().and_then(|inner| {
            inner
                .history
                .iter()
                .find(|c| c.cycle_id == cycle_id)
                .cloned()
        })
    }

    /// Total number of cycles recorded. Returns 0 if the lock is poisoned.
    pub fn cycle_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.history.len()).unwrap_or(0)
    }

    // ── Private helpers ──────────────────────────────────────────────────

    fn finish(&self, mut cycle: EvolutionCycle) -> Result<EvolutionCycle, EvolveError> {
        cycle.completed_at_secs = Some(self.clock.now_secs());
        tracing::info!(
            component_id = %cycle.component_id,
            cycle_id = %cycle.cycle_id,
            status = %cycle.status,
            candidates = cycle.candidates.len(),
            faults = cycle.faults.len(),
            "evolution cycle completed"
        );
        let mut inner = self.inner.lock().map_err(|_| EvolveError::LockPoisoned)?;
        inner.history.push(cycle.clone());
        Ok(cycle)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────

/// Build a population around the baseline. Slot 0 is the baseline itself;
/// the rest come from mutation or, when the lineage offers a second
/// parent, crossover with an ancestor.
fn build_population(
    baseline: &ComponentGenome,
    lineage: &[ComponentGenome],
    config: &EvolutionConfig,
    rng: &mut XorShiftRng,
    now_secs: u64,
) -> Vec<ComponentGenome> {
    let mut population = Vec::with_capacity(config.population_size);
    population.push(baseline.clone());
    for slot in 1..config.population_size {
        let roll = rng.next_f64();
        let candidate = if roll < config.mutation_rate || lineage.len() < 2 {
            // Alternate the numeric direction by slot so the population
            // samples both sides of the current value.
            let direction = if slot % 2 == 1 { 1.0 } else { -1.0 };
            operators::mutate(baseline, config, rng, direction, now_secs)
        } else {
            // Partner from the ancestry, excluding the current genome.
            let partner = &lineage[rng.next_index(lineage.len() - 1)];
            operators::uniform_crossover(baseline, partner, rng, now_secs)
        };
        population.push(candidate);
    }
    population
}

/// Score and validate one candidate. Pure with respect to shared state.
fn score_candidate(
    evaluator: &dyn FitnessEvaluator,
    validator: Option<&dyn SafetyValidator>,
    genome: &ComponentGenome,
) -> Result<(f64, Option<SafetyReport>), CandidateFault> {
    let hash = genome.hash();
    let fitness = match evaluator.evaluate(genome) {
        Ok(score) if score.is_finite() => score.clamp(0.0, 1.0),
        Ok(score) => {
            return Err(CandidateFault {
                genome_hash: hash,
                stage: FaultStage::Evaluation,
                message: format!("non-finite fitness {score}"),
            })
        }
        Err(message) => {
            return Err(CandidateFault {
                genome_hash: hash,
                stage: FaultStage::Evaluation,
                message,
            })
        }
    };
    let report = match validator {
        Some(validator) => match validator.validate(genome) {
            Ok(report) => Some(report),
            Err(message) => {
                return Err(CandidateFault {
                    genome_hash: hash,
                    stage: FaultStage::Validation,
                    message,
                })
            }
        },
        None => None,
    };
    Ok((fitness, report))
}

/// Run a candidate on the blocking pool under the configured timeout.
async fn evaluate_with_timeout(
    evaluator: Arc<dyn FitnessEvaluator>,
    validator: Option<Arc<dyn SafetyValidator>>,
    genome: ComponentGenome,
    timeout: Duration,
) -> Result<(f64, Option<SafetyReport>), CandidateFault> {
    let hash = genome.hash();
    let handle = tokio::task::spawn_blocking(move || {
        score_candidate(evaluator.as_ref(), validator.as_deref(), &genome)
    });
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CandidateFault {
            genome_hash: hash,
            stage: FaultStage::Evaluation,
            message: format!("evaluator panicked: {join_err}"),
        }),
        Err(_) => Err(CandidateFault {
            genome_hash: hash,
            stage: FaultStage::Timeout,
            message: format!("evaluation exceeded {}ms", timeout.as_millis()),
        }),
    }
}

/// Pick the winner: highest fitness, then lowest generation, then hash.
fn select_winner(mut ranked: Vec<(f64, u64, String)>) -> Option<(f64, u64, String)> {
    ranked.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    ranked.into_iter().next()
}

// ─── Tests ───────────────────────────────────────────────────────────────
