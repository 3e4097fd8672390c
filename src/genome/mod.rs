//! # Genome Subsystem
//!
//! ## Responsibility
//! Represent component configurations as immutable, content-addressed
//! records. A genome is a named set of tagged genes plus bookkeeping
//! (version, generation, lineage); its digest is a pure function of the
//! component id and the gene set, independent of insertion order.
//!
//! ## Guarantees
//! - Immutable: operators and the registry always produce a new record
//! - Content-addressed: equal (component id, genes) always digest equally
//! - Order-independent: genes are kept sorted by name, so the digest does
//!   not depend on the order genes were added
//!
//! ## Module map
//! - [`gene`]     -- tagged gene values and their canonical encodings
//! - [`registry`] -- current-genome map, lineage history, CAS install
//!
//! ## NOT Responsible For
//! - Mutation/crossover (see `evolution::operators`)
//! - Fitness scoring (see `evolution::evaluators`)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod gene;
pub mod registry;

pub use gene::{Gene, GeneKind};
pub use registry::{GenomeRegistry, RegistryError};

// ─── ComponentGenome ─────────────────────────────────────────────────────────

/// A versioned configuration for one component.
///
/// Treated as immutable once constructed: the genetic operators and the
/// registry never modify a genome in place, they build new records. Genes
/// live in a `BTreeMap` so iteration order — and therefore [`hash`] — is
/// independent of insertion order.
///
/// [`hash`]: ComponentGenome::hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentGenome {
    /// The component this configuration belongs to.
    pub component_id: String,
    /// Evaluator category; selects which fitness/safety functions score
    /// this genome.
    pub category: String,
    /// Registry version. Starts at 1 and is bumped by the registry on each
    /// successful deploy; the digest does not cover it.
    pub version: u64,
    /// Named genes, sorted by name.
    pub genes: BTreeMap<String, Gene>,
    /// Fitness score in `[0, 1]` from the most recent evaluation, if any.
    pub fitness: Option<f64>,
    /// Generation number; 0 for registered roots, `max(parents) + 1` for
    /// offspring.
    pub generation: u64,
    /// Digests of the parent genome(s) this record was derived from. Empty
    /// for registered roots, one entry for mutants, two for crossover.
    pub parents: Vec<String>,
    /// Unix timestamp (seconds) when this record was created.
    pub created_at_secs: u64,
}

impl ComponentGenome {
    /// Create a root genome for `component_id` with no genes, category
    /// `"default"`, version 1, generation 0 and empty lineage.
    pub fn new(component_id: impl Into<String>, created_at_secs: u64) -> Self {
        Self {
            component_id: component_id.into(),
            category: "default".to_string(),
            version: 1,
            genes: BTreeMap::new(),
            fitness: None,
            generation: 0,
            parents: Vec::new(),
            created_at_secs,
        }
    }

    /// Set the evaluator category (chainable).
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Add or replace a gene (chainable).
    pub fn with_gene(mut self, name: impl Into<String>, gene: Gene) -> Self {
        self.genes.insert(name.into(), gene);
        self
    }

    /// Set the fitness score (chainable). The digest is unaffected.
    pub fn with_fitness(mut self, fitness: f64) -> Self {
        self.fitness = Some(fitness);
        self
    }

    /// Build an offspring record carrying this genome's identity.
    ///
    /// The child keeps `component_id`, `category` and `version` (the registry
    /// re-stamps the version on deploy), starts with no fitness, and records
    /// the given gene set, generation and parent digests.
    pub fn child(
        &self,
        genes: BTreeMap<String, Gene>,
        generation: u64,
        parents: Vec<String>,
        created_at_secs: u64,
    ) -> Self {
        Self {
            component_id: self.component_id.clone(),
            category: self.category.clone(),
            version: self.version,
            genes,
            fitness: None,
            generation,
            parents,
            created_at_secs,
        }
    }

    /// Look up a gene by name.
    pub fn gene(&self, name: &str) -> Option<&Gene> {
        self.genes.get(name)
    }

    /// SHA-256 digest (lowercase hex) over the component id and the full
    /// gene set.
    ///
    /// Pure and order-independent: two genomes with the same component id
    /// and genes always hash identically, regardless of how the genes were
    /// inserted. Version, fitness, generation, lineage and creation time are
    /// excluded, so re-stamping those never changes a genome's identity.
    /// Used both as a lineage pointer and as the memoization key for fitness
    /// evaluation.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.component_id.as_bytes());
        for (name, gene) in &self.genes {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(gene.hash_fragment().as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// First 12 hex characters of [`hash`], for log fields.
    ///
    /// [`hash`]: ComponentGenome::hash
    pub fn short_hash(&self) -> String {
        let mut hash = self.hash();
        hash.truncate(12);
        hash
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
