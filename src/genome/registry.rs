//! # Genome Registry
//!
//! ## Responsibility
//! Hold the current genome per component plus the full lineage history, and
//! perform the deploy step as a compare-and-swap keyed on the digest of the
//! genome that was current when the evolution cycle began.
//!
//! ## Guarantees
//! - Thread-safe: clones share state via `Arc<Mutex<_>>`
//! - Append-only lineage: genomes are superseded, never deleted
//! - CAS install: a concurrent change between cycle start and deploy is
//!   reported as a conflict, never silently overwritten
//!
//! ## NOT Responsible For
//! - Deciding what to install (the evolution manager owns acceptance)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::ComponentGenome;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors produced by the genome registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An internal mutex was poisoned by a panicking thread.
    #[error("registry lock poisoned")]
    LockPoisoned,

    /// The requested component id has never been registered.
    #[error("component not registered: '{0}'")]
    ComponentNotRegistered(String),

    /// The current genome changed between cycle start and deploy.
    #[error(
        "concurrent modification on '{component_id}': expected current genome \
         {expected}, found {actual}"
    )]
    ConcurrentModification {
        /// Component whose genome was contested.
        component_id: String,
        /// Digest of the genome the caller believed was current.
        expected: String,
        /// Digest of the genome actually current.
        actual: String,
    },
}

// ─── Internal state ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RegistryInner {
    current: HashMap<String, ComponentGenome>,
    lineages: HashMap<String, Vec<ComponentGenome>>,
}

// ─── GenomeRegistry ──────────────────────────────────────────────────────────

/// Thread-safe store of current genomes and their lineage.
///
/// Cheap to clone — all clones share the same inner state.
#[derive(Debug, Clone, Default)]
pub struct GenomeRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl GenomeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `genome` as the current state for its component id.
    ///
    /// Re-registering an existing id overwrites and returns the previous
    /// genome; both the old and new records remain in the lineage.
    ///
    /// # Errors
    /// Returns [`RegistryError::LockPoisoned`] if the internal mutex is
    /// poisoned.
    pub fn register(
        &self,
        genome: ComponentGenome,
    ) -> Result<Option<ComponentGenome>, RegistryError> {
        let mut inner = self.inner.lock().map_err(|_| RegistryError::LockPoisoned)?;
        let component_id = genome.component_id.clone();
        tracing::info!(
            component_id = %component_id,
            genome = %genome.short_hash(),
            "genome registered"
        );
        inner
            .lineages
            .entry(component_id.clone())
            .or_default()
            .push(genome.clone());
        Ok(inner.current.insert(component_id, genome))
    }

    /// Return the current genome for `component_id`.
    ///
    /// # Errors
    /// - [`RegistryError::ComponentNotRegistered`] if the id is unknown.
    /// - [`RegistryError::LockPoisoned`] if the internal mutex is poisoned.
    pub fn current(&self, component_id: &str) -> Result<ComponentGenome, RegistryError> {
        let inner = self.inner.lock().map_err(|_| RegistryError::LockPoisoned)?;
        inner
            .current
            .get(component_id)
            .cloned()
            .ok_or_else(|| RegistryError::ComponentNotRegistered(component_id.to_string()))
    }

    /// Return the full lineage for `component_id`, ordered from the earliest
    /// ancestor to the current genome.
    ///
    /// # Errors
    /// - [`RegistryError::ComponentNotRegistered`] if the id is unknown.
    /// - [`RegistryError::LockPoisoned`] if the internal mutex is poisoned.
    pub fn lineage(&self, component_id: &str) -> Result<Vec<ComponentGenome>, RegistryError> {
        let inner = self.inner.lock().map_err(|_| RegistryError::LockPoisoned)?;
        inner
            .lineages
            .get(component_id)
            .cloned()
            .ok_or_else(|| RegistryError::ComponentNotRegistered(component_id.to_string()))
    }

    /// Install `genome` as the new current genome, compare-and-swap keyed on
    /// the digest of the genome that was current when the cycle began.
    ///
    /// On success the installed record gets `version = current.version + 1`
    /// and is appended to the lineage; the stamped record is returned.
    ///
    /// # Errors
    /// - [`RegistryError::ComponentNotRegistered`] if the id is unknown.
    /// - [`RegistryError::ConcurrentModification`] if the current genome's
    ///   digest no longer matches `expected_hash`; the registry is left
    ///   untouched.
    /// - [`RegistryError::LockPoisoned`] if the internal mutex is poisoned.
    pub fn install(
        &self,
        component_id: &str,
        expected_hash: &str,
        genome: ComponentGenome,
    ) -> Result<ComponentGenome, RegistryError> {
        let mut inner = self.inner.lock().map_err(|_| RegistryError::LockPoisoned)?;
        let current = inner
            .current
            .get(component_id)
            .ok_or_else(|| RegistryError::ComponentNotRegistered(component_id.to_string()))?;

        let actual = current.hash();
        if actual != expected_hash {
            return Err(RegistryError::ConcurrentModification {
                component_id: component_id.to_string(),
                expected: expected_hash.to_string(),
                actual,
            });
        }

        let mut installed = genome;
        installed.version = current.version + 1;
        tracing::info!(
            component_id = %component_id,
            genome = %installed.short_hash(),
            version = installed.version,
            "genome installed"
        );
        inner
            .lineages
            .entry(component_id.to_string())
            .or_default()
            .push(installed.clone());
        inner
            .current
            .insert(component_id.to_string(), installed.clone());
        Ok(installed)
    }

    /// All registered component ids, sorted.
    pub fn components(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(inner) => {
                let mut ids: Vec<String> = inner.current.keys().cloned().collect();
                ids.sort();
                ids
            }
            Err(_) => Vec::new(),
        }
    }

    /// Whether `component_id` has been registered.
    pub fn contains(&self, component_id: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.current.contains_key(component_id))
            .unwrap_or(false)
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.current.len()).unwrap_or(0)
    }

    /// Whether the registry has no components.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
