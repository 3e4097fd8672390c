//! # Optimizer Configuration
//!
//! ## Responsibility
//! Parse and validate TOML configuration for the optimizer: detector window
//! and thresholds, evolution rates and population sizing, governor limits.
//!
//! ## Guarantees
//! - Deterministic: the same TOML input always produces the same config
//! - Every field has a documented default, so partial files are valid
//! - Validation collects *all* violations before returning (no short-circuit)
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Constructing the optimizer from a config (see [`crate::optimizer`])

use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Default value functions ──────────────────────────────────────────────

/// Default detector window: 120 samples per metric.
fn default_window_size() -> usize {
    120
}

/// Default minimum samples before detection runs: 30.
fn default_min_samples() -> usize {
    30
}

/// Default z-score detection threshold: 3.0.
fn default_z_threshold() -> f64 {
    3.0
}

/// Default per-metric anomaly cooldown: 300 seconds (5 minutes).
fn default_cooldown_secs() -> u64 {
    300
}

/// Default anomaly log cap: 10 000 entries.
fn default_max_anomalies() -> usize {
    10_000
}

/// Default population size per evolution cycle: 10.
fn default_population_size() -> usize {
    10
}

/// Default probability a non-baseline slot is filled by mutation: 0.9.
fn default_mutation_rate() -> f64 {
    0.9
}

/// Default per-gene mutation probability: 0.5.
fn default_gene_mutation_rate() -> f64 {
    0.5
}

/// Default mutation strength (fraction of current magnitude): 0.5.
fn default_mutation_strength() -> f64 {
    0.5
}

/// Default enabled state: true.
fn default_true() -> bool {
    true
}

/// Default per-candidate evaluation timeout: 10 000ms.
fn default_evaluation_timeout_ms() -> u64 {
    10_000
}

/// Default safe-mode transition log cap: 1 000 entries.
fn default_max_transitions() -> usize {
    1_000
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// One or more semantic validation rules failed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "detector.window_size").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("io error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an optimizer instance.
///
/// Deserialized from TOML and validated before use. Every field has a
/// documented default, so an empty file is a valid configuration.
///
/// # Example
///
/// ```toml
/// [detector]
/// window_size = 240
/// z_threshold = 4.0
///
/// [evolution]
/// population_size = 20
/// auto_deploy = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizerConfig {
    /// Anomaly detector settings.
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Evolution manager settings.
    #[serde(default)]
    pub evolution: EvolutionConfig,
    /// Governor settings.
    #[serde(default)]
    pub governor: GovernorConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            evolution: EvolutionConfig::default(),
            governor: GovernorConfig::default(),
        }
    }
}

// ── Detector section ─────────────────────────────────────────────────────

/// Anomaly detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectorConfig {
    /// Samples retained per metric window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Minimum samples in the window before detection runs. Below this,
    /// recording returns "no anomaly" — a normal outcome, not an error.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// |z| above which a reading is flagged.
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    /// Seconds after an emitted anomaly during which further detections on
    /// the same metric are suppressed.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Anomaly log cap; oldest entries are dropped beyond it.
    #[serde(default = "default_max_anomalies")]
    pub max_anomalies: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_samples: default_min_samples(),
            z_threshold: default_z_threshold(),
            cooldown_secs: default_cooldown_secs(),
            max_anomalies: default_max_anomalies(),
        }
    }
}

// ── Evolution section ────────────────────────────────────────────────────

/// Evolution manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvolutionConfig {
    /// Population size per cycle, counting the unchanged baseline in slot 0.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Probability a non-baseline slot is produced by mutation; the rest
    /// use crossover when the lineage offers a second parent.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Per-gene probability that mutation touches a given gene.
    #[serde(default = "default_gene_mutation_rate")]
    pub gene_mutation_rate: f64,
    /// Magnitude of numeric perturbation as a fraction of the current
    /// value (unbounded genes only; bounded genes are resampled).
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
    /// Whether an approved cycle automatically installs its winner.
    #[serde(default = "default_true")]
    pub auto_deploy: bool,
    /// Per-candidate evaluation timeout in milliseconds. A timeout excludes
    /// only that candidate from the pool.
    #[serde(default = "default_evaluation_timeout_ms")]
    pub evaluation_timeout_ms: u64,
    /// Upper bound on concurrently evaluating candidates. `0` means "size
    /// the worker pool to the population".
    #[serde(default)]
    pub max_concurrent_evaluations: usize,
}

impl EvolutionConfig {
    /// Worker pool size for candidate evaluation.
    pub fn evaluation_concurrency(&self) -> usize {
        if self.max_concurrent_evaluations == 0 {
            self.population_size.max(1)
        } else {
            self.max_concurrent_evaluations
        }
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            mutation_rate: default_mutation_rate(),
            gene_mutation_rate: default_gene_mutation_rate(),
            mutation_strength: default_mutation_strength(),
            auto_deploy: default_true(),
            evaluation_timeout_ms: default_evaluation_timeout_ms(),
            max_concurrent_evaluations: 0,
        }
    }
}

// ── Governor section ─────────────────────────────────────────────────────

/// Governor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GovernorConfig {
    /// Safe-mode transition log cap; oldest entries are dropped beyond it.
    #[serde(default = "default_max_transitions")]
    pub max_transitions: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_transitions: default_max_transitions(),
        }
    }
}

// ── Loading and validation ───────────────────────────────────────────────

impl OptimizerConfig {
    /// Parse and validate a config from a TOML string.
    ///
    /// # Errors
    /// - [`ConfigError::Parse`] on malformed TOML.
    /// - [`ConfigError::Validation`] listing every violated constraint.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: OptimizerConfig = toml::from_str(input)?;
        config.validate().map_err(|violations| {
            let joined = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            ConfigError::Validation(joined)
        })?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file.
    ///
    /// # Errors
    /// - [`ConfigError::Io`] if the file cannot be read.
    /// - [`ConfigError::Parse`] / [`ConfigError::Validation`] as for
    ///   [`OptimizerConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            file: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Validate all semantic constraints, collecting every violation.
    ///
    /// # Errors
    /// Returns the full list of violations; empty configs never reach here
    /// because every field has a default.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        // ── Detector ─────────────────────────────────────────────────────
        if self.detector.window_size == 0 {
            errors.push(invalid("detector.window_size", "0", "must be at least 1"));
        }
        if self.detector.min_samples == 0 {
            errors.push(invalid("detector.min_samples", "0", "must be at least 1"));
        }
        if self.detector.min_samples > self.detector.window_size {
            errors.push(invalid(
                "detector.min_samples",
                &self.detector.min_samples.to_string(),
                "must not exceed window_size, or detection never runs",
            ));
        }
        if !(self.detector.z_threshold.is_finite() && self.detector.z_threshold > 0.0) {
            errors.push(invalid(
                "detector.z_threshold",
                &self.detector.z_threshold.to_string(),
                "must be positive and finite",
            ));
        }
        if self.detector.max_anomalies == 0 {
            errors.push(invalid("detector.max_anomalies", "0", "must be at least 1"));
        }

        // ── Evolution ────────────────────────────────────────────────────
        if self.evolution.population_size < 2 {
            errors.push(invalid(
                "evolution.population_size",
                &self.evolution.population_size.to_string(),
                "must be at least 2 (baseline plus one candidate)",
            ));
        }
        if !(0.0..=1.0).contains(&self.evolution.mutation_rate) {
            errors.push(invalid(
                "evolution.mutation_rate",
                &self.evolution.mutation_rate.to_string(),
                "must be between 0.0 and 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.evolution.gene_mutation_rate) {
            errors.push(invalid(
                "evolution.gene_mutation_rate",
                &self.evolution.gene_mutation_rate.to_string(),
                "must be between 0.0 and 1.0",
            ));
        }
        if !(self.evolution.mutation_strength.is_finite() && self.evolution.mutation_strength > 0.0)
        {
            errors.push(invalid(
                "evolution.mutation_strength",
                &self.evolution.mutation_strength.to_string(),
                "must be positive and finite",
            ));
        }
        if self.evolution.evaluation_timeout_ms == 0 {
            errors.push(invalid(
                "evolution.evaluation_timeout_ms",
                "0",
                "must be at least 1",
            ));
        }

        // ── Governor ─────────────────────────────────────────────────────
        if self.governor.max_transitions == 0 {
            errors.push(invalid("governor.max_transitions", "0", "must be at least 1"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Export the JSON Schema for [`OptimizerConfig`].
///
/// Enables IDE autocomplete when editing TOML config files.
///
/// # Errors
/// Returns `serde_json::Error` if schema serialization fails (should not
/// happen with well-formed derive macros).
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(OptimizerConfig);
    serde_json::to_string_pretty(&schema)
}

// ── Tests ────────────────────────────────────────────────────────────────
