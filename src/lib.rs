//! # evotune
//!
//! A self-tuning component optimizer: genetic search over configuration
//! genomes, guarded by statistical anomaly detection and a safe-mode
//! governor.
//!
//! ## Architecture
//!
//! One closed tuning loop over shared handles:
//! ```text
//! record_metric ─► AnomalyDetector ─unresolved─► Governor ─halts─► Manager
//! evolve ─► population ─► bounded eval pool ─► select ─► CAS ─► GenomeRegistry
//! ```

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod clock;
pub mod config;
pub mod evolution;
pub mod genome;
pub mod governor;
pub mod optimizer;
pub mod telemetry;

// Re-exports for convenience
pub use config::OptimizerConfig;
pub use genome::{ComponentGenome, Gene, GenomeRegistry};
pub use optimizer::Optimizer;

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
///   (Datadog, Grafana Loki, etc.)
/// - anything else (including unset) — human-readable pretty output
///   for local development
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OptimizerError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use evotune::{init_tracing, OptimizerError};
/// # fn example() -> Result<(), OptimizerError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), OptimizerError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OptimizerError::Other(format!("tracing init failed: {e}")))
}

/// Top-level optimizer errors.
///
/// Subsystem errors stay typed on their own surfaces
/// ([`genome::RegistryError`], [`telemetry::DetectorError`],
/// [`evolution::EvolveError`], [`governor::GovernorError`]); this enum only
/// covers crate-level concerns.
#[derive(Error, Debug)]
pub enum OptimizerError {
    /// A configuration value failed to parse or validate.
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first cycle.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}
