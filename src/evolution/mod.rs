//! # Evolution Subsystem
//!
//! Genetic search over component configurations: population construction,
//! pluggable fitness/safety evaluation, and the cycle state machine that
//! takes a candidate from proposal to deployment.
//!
//! ## Module map
//! - [`operators`]  -- mutation, crossover and the deterministic RNG
//! - [`evaluators`] -- category-keyed fitness and safety plugins
//! - [`cycle`]      -- the audit record one evolution run produces
//! - [`manager`]    -- orchestration: populate, evaluate, select, deploy

pub mod cycle;
pub mod evaluators;
pub mod manager;
pub mod operators;

pub use cycle::{CandidateFault, CycleStatus, EvolutionCycle, FaultStage};
pub use evaluators::{
    fitness_fn, safety_fn, EvaluatorError, EvaluatorRegistry, FitnessEvaluator, SafetyReport,
    SafetyValidator,
};
pub use manager::{EvolutionManager, EvolveError};
pub use operators::XorShiftRng;
