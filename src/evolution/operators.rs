//! # Genetic Operators
//!
//! ## Responsibility
//! Produce candidate genomes from existing ones: point mutation across the
//! tagged gene variants and uniform crossover between two parents.
//!
//! ## Guarantees
//! - Deterministic: the same RNG state and inputs yield the same child
//! - Mutation respects declared numeric bounds (bounded genes resample
//!   inside their range, never outside it)
//! - Categorical mutation only ever selects a declared choice
//! - Lineage bookkeeping is consistent: children carry their parents'
//!   hashes and `generation = max(parent generations) + 1`
//!
//! ## NOT Responsible For
//! - Fitness evaluation or candidate selection (see [`super::manager`])
//! - Persisting children in the registry

use crate::config::EvolutionConfig;
use crate::genome::{ComponentGenome, Gene};

// ─── RNG ─────────────────────────────────────────────────────────────────

/// Deterministic xorshift64 random number generator.
///
/// Lightweight and reproducible. Not cryptographically secure, which is
/// fine here: candidate sampling needs replayability, not unpredictability.
#[derive(Debug, Clone)]
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    /// Create a generator from a seed. A zero seed is coerced to 1, since
    /// xorshift64 has a fixed point at zero.
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Next value in `[0, 1)` with 1e-6 granularity.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() % 1_000_000) as f64 / 1_000_000.0
    }

    /// Next index in `[0, modulus)`. Returns 0 for a zero modulus.
    pub fn next_index(&mut self, modulus: usize) -> usize {
        if modulus == 0 {
            return 0;
        }
        (self.next_u64() as usize) % modulus
    }
}

// ─── Mutation ────────────────────────────────────────────────────────────

/// Produce a mutated child of `parent`.
///
/// Each gene is perturbed with probability `config.gene_mutation_rate`:
/// - unbounded numerics move by `direction * u * strength * |value|`
///   for uniform `u` in `[0, 1)`
/// - bounded numerics resample uniformly inside their range
/// - booleans flip
/// - categoricals switch to a different declared choice
///
/// `direction` (`+1.0` / `-1.0`) steers unbounded numeric moves so callers
/// can sample both sides of the current value across a population.
///
/// If the per-gene pass leaves every gene untouched, one mutable gene is
/// forcibly perturbed so the child is not a trivial copy. A gene that
/// cannot move (zero-valued unbounded numeric, degenerate bounds, or a
/// single-choice categorical) is never picked for the forced pass.
pub fn mutate(
    parent: &ComponentGenome,
    config: &EvolutionConfig,
    rng: &mut XorShiftRng,
    direction: f64,
    now_secs: u64,
) -> ComponentGenome {
    let mut genes = parent.genes.clone();
    let mut changed = false;

    for gene in genes.values_mut() {
        if rng.next_f64() < config.gene_mutation_rate {
            let before = gene.clone();
            mutate_gene(gene, config.mutation_strength, direction, rng, false);
            changed = changed || *gene != before;
        }
    }

    if !changed {
        // BTreeMap iteration order makes the forced pick reproducible.
        let mutable: Vec<String> = genes
            .iter()
            .filter(|(_, gene)| can_move(gene))
            .map(|(name, _)| name.clone())
            .collect();
        if !mutable.is_empty() {
            let name = &mutable[rng.next_index(mutable.len())];
            if let Some(gene) = genes.get_mut(name) {
                mutate_gene(gene, config.mutation_strength, direction, rng, true);
            }
        }
    }

    parent.child(
        genes,
        parent.generation + 1,
        vec![parent.hash()],
        now_secs,
    )
}

/// Perturb a single gene in place.
///
/// `forced` lifts the uniform draw for unbounded numerics into `[0.5, 1)`
/// so the move cannot round to zero.
fn mutate_gene(
    gene: &mut Gene,
    strength: f64,
    direction: f64,
    rng: &mut XorShiftRng,
    forced: bool,
) {
    match gene {
        Gene::Numeric {
            value,
            bounds: None,
        } => {
            let u = if forced {
                0.5 + 0.5 * rng.next_f64()
            } else {
                rng.next_f64()
            };
            *value += direction * u * strength * value.abs();
        }
        Gene::Numeric {
            value,
            bounds: Some((min, max)),
        } => {
            *value = *min + rng.next_f64() * (*max - *min);
        }
        Gene::Boolean { value } => {
            *value = !*value;
        }
        Gene::Categorical { value, choices } => {
            let others: Vec<&String> = choices.iter().filter(|c| *c != value).collect();
            if !others.is_empty() {
                *value = others[rng.next_index(others.len())].clone();
            }
        }
    }
}

/// Whether a gene can take a different value at all.
fn can_move(gene: &Gene) -> bool {
    match gene {
        Gene::Numeric {
            value,
            bounds: None,
        } => *value != 0.0,
        Gene::Numeric {
            bounds: Some((min, max)),
            ..
        } => max > min,
        Gene::Boolean { .. } => true,
        Gene::Categorical { value, choices } => choices.iter().any(|c| c != value),
    }
}

// ─── Crossover ───────────────────────────────────────────────────────────

/// Produce a child by uniform crossover of two parents.
///
/// Each gene is drawn from one parent by a fair coin flip; genes present
/// only in `first` fall back to the `first` copy. The child's generation is
/// one past the older parent and both parent hashes are recorded.
pub fn uniform_crossover(
    first: &ComponentGenome,
    second: &ComponentGenome,
    rng: &mut XorShiftRng,
    now_secs: u64,
) -> ComponentGenome {
    let mut genes = first.genes.clone();
    for (name, gene) in genes.iter_mut() {
        if let Some(other) = second.gene(name) {
            if rng.next_index(2) == 1 {
                *gene = other.clone();
            }
        }
    }

    first.child(
        genes,
        first.generation.max(second.generation) + 1,
        vec![first.hash(), second.hash()],
        now_secs,
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn genome_with(genes: &[(&str, Gene)]) -> ComponentGenome {
        let mut genome = ComponentGenome::new("cache", 100);
        for (name, gene) in genes {
            genome = genome.with_gene(*name, gene.clone());
        }
        genome
    }

    fn always_mutate() -> EvolutionConfig {
        EvolutionConfig {
            gene_mutation_rate: 1.0,
            ..EvolutionConfig::default()
        }
    }

    fn never_mutate() -> EvolutionConfig {
        EvolutionConfig {
            gene_mutation_rate: 0.0,
            ..EvolutionConfig::default()
        }
    }

    // ── RNG ──────────────────────────────────────────────────────────────

    #[test]
    fn test_rng_is_deterministic_for_same_seed() {
        let mut a = XorShiftRng::new(123);
        let mut b = XorShiftRng::new(123);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_rng_zero_seed_is_coerced() {
        let mut rng = XorShiftRng::new(0);
        // A zero state would stay at zero forever.
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn test_rng_next_f64_in_unit_interval() {
        let mut rng = XorShiftRng::new(7);
        for _ in 0..1_000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x), "out of range: {x}");
        }
    }

    #[test]
    fn test_rng_next_index_respects_modulus() {
        let mut rng = XorShiftRng::new(9);
        for _ in 0..1_000 {
            assert!(rng.next_index(5) < 5);
        }
        assert_eq!(rng.next_index(0), 0);
    }

    // ── Mutation ─────────────────────────────────────────────────────────

    #[test]
    fn test_mutate_unbounded_numeric_moves_in_direction() {
        let parent = genome_with(&[("batch_size", Gene::numeric(64.0))]);
        let mut rng = XorShiftRng::new(42);

        let up = mutate(&parent, &always_mutate(), &mut rng, 1.0, 200);
        let up_value = up.gene("batch_size").and_then(Gene::as_f64).unwrap();
        assert!(up_value >= 64.0, "direction +1 should not decrease: {up_value}");

        let down = mutate(&parent, &always_mutate(), &mut rng, -1.0, 200);
        let down_value = down.gene("batch_size").and_then(Gene::as_f64).unwrap();
        assert!(down_value <= 64.0, "direction -1 should not increase: {down_value}");
    }

    #[test]
    fn test_mutate_bounded_numeric_stays_in_bounds() {
        let parent = genome_with(&[("timeout", Gene::numeric_bounded(5.0, 1.0, 10.0))]);
        let mut rng = XorShiftRng::new(42);
        for _ in 0..50 {
            let child = mutate(&parent, &always_mutate(), &mut rng, 1.0, 200);
            let value = child.gene("timeout").and_then(Gene::as_f64).unwrap();
            assert!((1.0..=10.0).contains(&value), "out of bounds: {value}");
        }
    }

    #[test]
    fn test_mutate_flips_boolean() {
        let parent = genome_with(&[("compression", Gene::boolean(true))]);
        let mut rng = XorShiftRng::new(42);
        let child = mutate(&parent, &always_mutate(), &mut rng, 1.0, 200);
        assert_eq!(child.gene("compression").and_then(Gene::as_bool), Some(false));
    }

    #[test]
    fn test_mutate_categorical_picks_other_choice() {
        let parent = genome_with(&[(
            "eviction",
            Gene::categorical("lru", vec!["lru".into(), "lfu".into(), "fifo".into()]),
        )]);
        let mut rng = XorShiftRng::new(42);
        for _ in 0..20 {
            let child = mutate(&parent, &always_mutate(), &mut rng, 1.0, 200);
            let value = child.gene("eviction").and_then(Gene::as_str).unwrap();
            assert_ne!(value, "lru");
            assert!(["lfu", "fifo"].contains(&value));
        }
    }

    #[test]
    fn test_mutate_single_choice_categorical_is_unchanged() {
        let parent = genome_with(&[("mode", Gene::categorical("fixed", vec!["fixed".into()]))]);
        let mut rng = XorShiftRng::new(42);
        let child = mutate(&parent, &always_mutate(), &mut rng, 1.0, 200);
        assert_eq!(child.gene("mode").and_then(Gene::as_str), Some("fixed"));
    }

    #[test]
    fn test_mutate_forces_at_least_one_change() {
        let parent = genome_with(&[
            ("batch_size", Gene::numeric(64.0)),
            ("compression", Gene::boolean(true)),
        ]);
        let mut rng = XorShiftRng::new(42);
        // Per-gene rate 0 would otherwise leave the child identical.
        let child = mutate(&parent, &never_mutate(), &mut rng, 1.0, 200);
        assert_ne!(child.hash(), parent.hash());
    }

    #[test]
    fn test_mutate_skips_immovable_genes_in_forced_pass() {
        let parent = genome_with(&[
            ("zero", Gene::numeric(0.0)),
            ("mode", Gene::categorical("fixed", vec!["fixed".into()])),
            ("compression", Gene::boolean(false)),
        ]);
        let mut rng = XorShiftRng::new(42);
        for _ in 0..10 {
            let child = mutate(&parent, &never_mutate(), &mut rng, 1.0, 200);
            // Only the boolean can move, so the forced pass must hit it.
            assert_eq!(child.gene("compression").and_then(Gene::as_bool), Some(true));
            assert_eq!(child.gene("zero").and_then(Gene::as_f64), Some(0.0));
        }
    }

    #[test]
    fn test_mutate_with_no_movable_genes_returns_copy() {
        let parent = genome_with(&[("zero", Gene::numeric(0.0))]);
        let mut rng = XorShiftRng::new(42);
        let child = mutate(&parent, &never_mutate(), &mut rng, 1.0, 200);
        assert_eq!(child.hash(), parent.hash());
    }

    #[test]
    fn test_mutate_records_lineage() {
        let parent = genome_with(&[("batch_size", Gene::numeric(64.0))]);
        let mut rng = XorShiftRng::new(42);
        let child = mutate(&parent, &always_mutate(), &mut rng, 1.0, 200);
        assert_eq!(child.generation, parent.generation + 1);
        assert_eq!(child.parents, vec![parent.hash()]);
        assert_eq!(child.component_id, parent.component_id);
        assert_eq!(child.created_at_secs, 200);
        assert!(child.fitness.is_none());
    }

    #[test]
    fn test_mutate_is_deterministic_for_same_seed() {
        let parent = genome_with(&[
            ("batch_size", Gene::numeric(64.0)),
            ("timeout", Gene::numeric_bounded(5.0, 1.0, 10.0)),
            ("compression", Gene::boolean(true)),
        ]);
        let mut rng_a = XorShiftRng::new(55);
        let mut rng_b = XorShiftRng::new(55);
        let a = mutate(&parent, &always_mutate(), &mut rng_a, 1.0, 200);
        let b = mutate(&parent, &always_mutate(), &mut rng_b, 1.0, 200);
        assert_eq!(a.hash(), b.hash());
    }

    // ── Crossover ────────────────────────────────────────────────────────

    #[test]
    fn test_crossover_every_gene_comes_from_a_parent() {
        let first = genome_with(&[
            ("batch_size", Gene::numeric(64.0)),
            ("compression", Gene::boolean(true)),
            ("eviction", Gene::categorical("lru", vec!["lru".into(), "lfu".into()])),
        ]);
        let second = genome_with(&[
            ("batch_size", Gene::numeric(128.0)),
            ("compression", Gene::boolean(false)),
            ("eviction", Gene::categorical("lfu", vec!["lru".into(), "lfu".into()])),
        ]);
        let mut rng = XorShiftRng::new(42);

        for _ in 0..20 {
            let child = uniform_crossover(&first, &second, &mut rng, 300);
            for (name, gene) in &child.genes {
                let from_first = first.gene(name) == Some(gene);
                let from_second = second.gene(name) == Some(gene);
                assert!(from_first || from_second, "gene {name} matches neither parent");
            }
        }
    }

    #[test]
    fn test_crossover_mixes_both_parents_eventually() {
        let first = genome_with(&[
            ("a", Gene::numeric(1.0)),
            ("b", Gene::numeric(1.0)),
            ("c", Gene::numeric(1.0)),
            ("d", Gene::numeric(1.0)),
        ]);
        let second = genome_with(&[
            ("a", Gene::numeric(2.0)),
            ("b", Gene::numeric(2.0)),
            ("c", Gene::numeric(2.0)),
            ("d", Gene::numeric(2.0)),
        ]);
        let mut rng = XorShiftRng::new(42);

        let mut saw_first = false;
        let mut saw_second = false;
        for _ in 0..20 {
            let child = uniform_crossover(&first, &second, &mut rng, 300);
            for gene in child.genes.values() {
                match gene.as_f64() {
                    Some(v) if (v - 1.0).abs() < f64::EPSILON => saw_first = true,
                    Some(v) if (v - 2.0).abs() < f64::EPSILON => saw_second = true,
                    _ => {}
                }
            }
        }
        assert!(saw_first && saw_second, "coin flip never mixed parents");
    }

    #[test]
    fn test_crossover_missing_gene_falls_back_to_first_parent() {
        let first = genome_with(&[
            ("batch_size", Gene::numeric(64.0)),
            ("only_in_first", Gene::boolean(true)),
        ]);
        let second = genome_with(&[("batch_size", Gene::numeric(128.0))]);
        let mut rng = XorShiftRng::new(42);
        let child = uniform_crossover(&first, &second, &mut rng, 300);
        assert_eq!(child.gene("only_in_first").and_then(Gene::as_bool), Some(true));
    }

    #[test]
    fn test_crossover_records_both_parents_and_max_generation() {
        let first = genome_with(&[("batch_size", Gene::numeric(64.0))]);
        let mut second = genome_with(&[("batch_size", Gene::numeric(128.0))]);
        second.generation = 5;
        let mut rng = XorShiftRng::new(42);

        let child = uniform_crossover(&first, &second, &mut rng, 300);
        assert_eq!(child.generation, 6);
        assert_eq!(child.parents, vec![first.hash(), second.hash()]);
        assert_eq!(child.created_at_secs, 300);
    }
}
