//! Integration tests for the optimizer facade.
//!
//! Tests cover the end-to-end behaviors over the public surface:
//! 1. Evolution: a rewarding fitness function climbs a threshold gene,
//!    deploys winners, and grows the lineage
//! 2. Detection: steady telemetry stays quiet, a spike flags Critical,
//!    cooldown suppresses repeats, resolution is idempotent
//! 3. Governance: an unresolved anomaly halts evolution until reviewed;
//!    an explicit override bypasses the halt
//! 4. Isolation: histories and lineages never bleed across components

use std::sync::Arc;

use evotune::clock::ManualClock;
use evotune::config::EvolutionConfig;
use evotune::evolution::{
    fitness_fn, safety_fn, CycleStatus, EvolveError, FitnessEvaluator, SafetyReport,
};
use evotune::telemetry::{AnomalyFilter, Severity};
use evotune::{ComponentGenome, Gene, Optimizer, OptimizerConfig};

// ── Helpers ──────────────────────────────────────────────────────────────

fn small_config() -> OptimizerConfig {
    OptimizerConfig {
        evolution: EvolutionConfig {
            population_size: 5,
            ..EvolutionConfig::default()
        },
        ..OptimizerConfig::default()
    }
}

fn make_optimizer(config: OptimizerConfig) -> (Optimizer, ManualClock) {
    let clock = ManualClock::new(1_000);
    let optimizer = Optimizer::with_clock(config, 42, Arc::new(clock.clone()));
    (optimizer, clock)
}

// A single numeric gene keeps the cycles fully deterministic: mutation
// always moves the threshold, so a rewarding evaluator always finds a
// strictly better candidate until the fitness cap.
fn threshold_genome(component_id: &str) -> ComponentGenome {
    ComponentGenome::new(component_id, 1_000).with_gene("threshold", Gene::numeric(0.5))
}

/// Fitness that rewards a higher threshold, capped at 1.0.
fn reward_threshold() -> Arc<dyn FitnessEvaluator> {
    fitness_fn(|genome| {
        genome
            .gene("threshold")
            .and_then(Gene::as_f64)
            .map(|v| v.clamp(0.0, 1.0))
            .ok_or_else(|| "missing threshold gene".to_string())
    })
}

/// Fill a metric's window with alternating 95/105 readings (mean 100,
/// stddev 5) so the next large reading scores far out of band.
fn seed_window(optimizer: &Optimizer, metric: &str, samples: usize) {
    for i in 0..samples {
        let value = if i % 2 == 0 { 95.0 } else { 105.0 };
        optimizer
            .record_metric(metric, value, None)
            .expect("seeding must not fail");
    }
}

// ── Evolution ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_threshold_climbs_and_deploys() {
    let (optimizer, _) = make_optimizer(small_config());
    optimizer.register(threshold_genome("cache")).unwrap();
    optimizer
        .register_fitness_evaluator("default", reward_threshold())
        .unwrap();

    let cycle = optimizer
        .evolve("cache", Some("hit_rate"), None)
        .await
        .unwrap();

    assert_eq!(cycle.status, CycleStatus::Deployed);
    assert_eq!(cycle.candidates.len(), 5);
    assert_eq!(cycle.target_metric.as_deref(), Some("hit_rate"));

    let current = optimizer.current("cache").unwrap();
    let threshold = current.gene("threshold").and_then(Gene::as_f64).unwrap();
    assert!(threshold > 0.5, "threshold should climb, got {threshold}");
    assert_eq!(current.version, 2);
    assert_eq!(current.generation, 1);

    // The lineage now reads root → winner, and the winner points back at
    // the root it was mutated from.
    let lineage = optimizer.lineage("cache").unwrap();
    assert_eq!(lineage.len(), 2);
    assert_eq!(lineage[1].hash(), current.hash());
    assert_eq!(current.parents, vec![lineage[0].hash()]);
}

#[tokio::test]
async fn test_repeated_cycles_never_regress() {
    let (optimizer, _) = make_optimizer(small_config());
    optimizer.register(threshold_genome("cache")).unwrap();
    optimizer
        .register_fitness_evaluator("default", reward_threshold())
        .unwrap();

    let mut last_threshold = 0.5;
    for _ in 0..3 {
        let cycle = optimizer.evolve("cache", None, None).await.unwrap();
        // Once the gene saturates the fitness cap no strict improvement
        // exists; until then every cycle deploys.
        assert!(matches!(
            cycle.status,
            CycleStatus::Deployed | CycleStatus::Rejected
        ));
        let threshold = optimizer
            .current("cache")
            .unwrap()
            .gene("threshold")
            .and_then(Gene::as_f64)
            .unwrap();
        assert!(
            threshold >= last_threshold,
            "deployed threshold regressed: {threshold} < {last_threshold}"
        );
        last_threshold = threshold;
    }

    assert!(last_threshold > 0.5);
    assert_eq!(optimizer.history(Some("cache")).len(), 3);
}

#[tokio::test]
async fn test_target_improvement_rejects_small_gains() {
    let (optimizer, _) = make_optimizer(small_config());
    optimizer.register(threshold_genome("cache")).unwrap();
    optimizer
        .register_fitness_evaluator("default", reward_threshold())
        .unwrap();

    let cycle = optimizer.evolve("cache", None, Some(0.9)).await.unwrap();
    assert_eq!(cycle.status, CycleStatus::Rejected);
    assert_eq!(cycle.target_improvement, Some(0.9));
    // Registry untouched by the rejected cycle.
    assert_eq!(optimizer.current("cache").unwrap().version, 1);
    assert_eq!(optimizer.lineage("cache").unwrap().len(), 1);
}

#[tokio::test]
async fn test_safety_validator_caps_the_winner() {
    let (optimizer, _) = make_optimizer(small_config());
    optimizer.register(threshold_genome("cache")).unwrap();
    optimizer
        .register_fitness_evaluator("default", reward_threshold())
        .unwrap();
    optimizer
        .register_safety_validator(
            "default",
            safety_fn(|genome| {
                let threshold = genome
                    .gene("threshold")
                    .and_then(Gene::as_f64)
                    .unwrap_or(f64::MAX);
                Ok(SafetyReport::new().with_check("threshold_cap", threshold <= 0.6))
            }),
        )
        .unwrap();

    let cycle = optimizer.evolve("cache", None, None).await.unwrap();
    let winner_hash = cycle.winner_hash.clone().expect("baseline always passes");
    let winner = cycle.winner().unwrap();
    let threshold = winner.gene("threshold").and_then(Gene::as_f64).unwrap();
    assert!(
        threshold <= 0.6,
        "winner must respect the safety cap, got {threshold}"
    );
    assert!(cycle.safety_of(&winner_hash).unwrap().passed());
}

#[tokio::test]
async fn test_unknown_component_and_missing_evaluator() {
    let (optimizer, _) = make_optimizer(small_config());

    let err = optimizer.evolve("ghost", None, None).await.unwrap_err();
    assert!(matches!(err, EvolveError::ComponentNotRegistered(_)));

    optimizer.register(threshold_genome("cache")).unwrap();
    let err = optimizer.evolve("cache", None, None).await.unwrap_err();
    assert!(matches!(err, EvolveError::EvaluatorNotRegistered(_)));
}

// ── Detection ────────────────────────────────────────────────────────────

#[test]
fn test_steady_telemetry_stays_quiet() {
    let (optimizer, _) = make_optimizer(small_config());
    // Zero variance: identical readings forever.
    for _ in 0..200 {
        let anomaly = optimizer.record_metric("throughput", 250.0, None).unwrap();
        assert!(anomaly.is_none(), "constant signal must never flag");
    }
    let stats = optimizer.stats("throughput").unwrap();
    assert_eq!(stats.stddev, 0.0);
    // Window capacity caps retention.
    assert_eq!(stats.count, optimizer.config().detector.window_size);
}

#[test]
fn test_spike_flags_critical_with_expected_range() {
    let (optimizer, _) = make_optimizer(small_config());
    seed_window(&optimizer, "latency_ms", 30);

    let anomaly = optimizer
        .record_metric("latency_ms", 500.0, Some("deploy 81ab2f".to_string()))
        .unwrap()
        .expect("a z=80 spike must flag");

    assert_eq!(anomaly.severity, Severity::Critical);
    assert!(anomaly.z_score > 8.0);
    assert_eq!(anomaly.value, 500.0);
    // Expected range is mean ± threshold·stddev = 100 ± 15.
    assert!((anomaly.expected_min - 85.0).abs() < 1e-9);
    assert!((anomaly.expected_max - 115.0).abs() < 1e-9);
    assert!(!anomaly.resolved);
}

#[test]
fn test_detection_needs_min_samples() {
    // 29 existing samples: one short of the floor, spike passes silently.
    let (optimizer, _) = make_optimizer(small_config());
    seed_window(&optimizer, "latency_ms", 29);
    assert!(optimizer
        .record_metric("latency_ms", 500.0, None)
        .unwrap()
        .is_none());

    // 30 existing samples: the same spike flags.
    let (optimizer, _) = make_optimizer(small_config());
    seed_window(&optimizer, "latency_ms", 30);
    assert!(optimizer
        .record_metric("latency_ms", 500.0, None)
        .unwrap()
        .is_some());
}

#[test]
fn test_cooldown_suppresses_then_releases() {
    let (optimizer, clock) = make_optimizer(small_config());
    seed_window(&optimizer, "latency_ms", 30);

    // First spike emits.
    assert!(optimizer
        .record_metric("latency_ms", 500.0, None)
        .unwrap()
        .is_some());

    // A second extreme reading inside the cooldown window is suppressed.
    clock.advance(10);
    assert!(optimizer
        .record_metric("latency_ms", 50_000.0, None)
        .unwrap()
        .is_none());

    // Suppressed detections do not refresh the cooldown: 301 s after the
    // *emitted* anomaly the metric flags again.
    clock.set(1_000 + 301);
    assert!(optimizer
        .record_metric("latency_ms", 900_000.0, None)
        .unwrap()
        .is_some());

    assert_eq!(
        optimizer.recent_anomalies(&AnomalyFilter::default()).len(),
        2
    );
}

#[test]
fn test_resolve_is_idempotent_through_facade() {
    let (optimizer, _) = make_optimizer(small_config());
    seed_window(&optimizer, "latency_ms", 30);
    let anomaly = optimizer
        .record_metric("latency_ms", 500.0, None)
        .unwrap()
        .unwrap();

    assert!(optimizer.resolve_anomaly(&anomaly.id).unwrap());
    assert!(!optimizer.resolve_anomaly(&anomaly.id).unwrap());
    assert!(!optimizer.resolve_anomaly("not-an-id").unwrap());
    assert!(optimizer.unresolved_anomalies().is_empty());
}

#[test]
fn test_record_batch_spans_metrics() {
    let (optimizer, _) = make_optimizer(small_config());
    seed_window(&optimizer, "cpu", 30);
    seed_window(&optimizer, "mem", 30);

    let emitted = optimizer
        .record_batch(&[
            ("cpu".to_string(), 500.0),
            ("mem".to_string(), 101.0),
            ("disk".to_string(), 12.0),
        ])
        .unwrap();

    // Only the cpu spike is out of band; mem is in range and disk has no
    // window yet.
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].metric, "cpu");
}

// ── Governance ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_anomaly_halts_evolution_until_reviewed() {
    let (optimizer, _) = make_optimizer(small_config());
    optimizer.register(threshold_genome("cache")).unwrap();
    optimizer
        .register_fitness_evaluator("default", reward_threshold())
        .unwrap();

    seed_window(&optimizer, "error_rate", 30);
    let anomaly = optimizer
        .record_metric("error_rate", 600.0, None)
        .unwrap()
        .unwrap();

    // The scheduler path sees the unresolved anomaly and halts.
    let err = optimizer.run_cycle("cache", None, None).await.unwrap_err();
    assert!(matches!(err, EvolveError::SafeModeActive));
    assert!(optimizer.is_safe_mode_active());

    // Direct evolve is blocked too; the override is not.
    let err = optimizer.evolve("cache", None, None).await.unwrap_err();
    assert!(matches!(err, EvolveError::SafeModeActive));
    let cycle = optimizer
        .evolve_with_override("cache", None, None, true)
        .await
        .unwrap();
    assert!(cycle.status.is_terminal());

    // Resolving alone is not enough: the governor never self-clears.
    optimizer.resolve_anomaly(&anomaly.id).unwrap();
    optimizer.enforce_policies().unwrap();
    assert!(optimizer.is_safe_mode_active());

    // Explicit review completes the loop.
    assert!(optimizer.deactivate_safe_mode("reviewed: bad deploy rolled back").unwrap());
    let cycle = optimizer.run_cycle("cache", None, None).await.unwrap();
    assert!(cycle.status.is_terminal());

    let transitions = optimizer.safe_mode_transitions();
    assert_eq!(transitions.len(), 2);
    assert!(transitions[0].reason.contains("error_rate"));
    assert_eq!(transitions[1].reason, "reviewed: bad deploy rolled back");
}

#[test]
fn test_enforce_policies_reports_unresolved_count() {
    let (optimizer, _) = make_optimizer(small_config());
    seed_window(&optimizer, "a", 30);
    seed_window(&optimizer, "b", 30);
    optimizer.record_metric("a", 500.0, None).unwrap().unwrap();
    optimizer.record_metric("b", 500.0, None).unwrap().unwrap();

    let report = optimizer.enforce_policies().unwrap();
    assert_eq!(report.unresolved_anomalies, 2);
    assert!(report.state_changed);

    // Repeat polls see the same count but no new transition.
    let report = optimizer.enforce_policies().unwrap();
    assert!(!report.state_changed);
    assert_eq!(optimizer.safe_mode_transitions().len(), 1);
}

// ── Isolation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_histories_and_lineages_stay_separate() {
    let (optimizer, _) = make_optimizer(small_config());
    optimizer.register(threshold_genome("reader")).unwrap();
    optimizer.register(threshold_genome("writer")).unwrap();
    optimizer
        .register_fitness_evaluator("default", reward_threshold())
        .unwrap();

    optimizer.evolve("reader", None, None).await.unwrap();
    optimizer.evolve("writer", None, None).await.unwrap();
    optimizer.evolve("reader", None, None).await.unwrap();

    let reader_history = optimizer.history(Some("reader"));
    assert_eq!(reader_history.len(), 2);
    assert!(reader_history.iter().all(|c| c.component_id == "reader"));
    assert_eq!(optimizer.history(Some("writer")).len(), 1);
    assert_eq!(optimizer.history(None).len(), 3);

    // Each component's lineage contains only its own genomes.
    for id in ["reader", "writer"] {
        let lineage = optimizer.lineage(id).unwrap();
        assert!(lineage.iter().all(|g| g.component_id == id));
    }
}

#[tokio::test]
async fn test_two_instances_are_fully_isolated() {
    let (first, _) = make_optimizer(small_config());
    let (second, _) = make_optimizer(small_config());
    first.register(threshold_genome("cache")).unwrap();
    first.activate_safe_mode("drill").unwrap();

    assert!(!second.contains("cache"));
    assert!(!second.is_safe_mode_active());
    assert!(second.safe_mode_transitions().is_empty());
}

// ── Configuration ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_toml_configuration_drives_the_cycle() {
    let optimizer = Optimizer::from_toml_str(
        r#"
        [detector]
        window_size = 50
        min_samples = 10

        [evolution]
        population_size = 3
        auto_deploy = false
        "#,
    )
    .unwrap();
    optimizer.register(threshold_genome("cache")).unwrap();
    optimizer
        .register_fitness_evaluator("default", reward_threshold())
        .unwrap();

    let cycle = optimizer.evolve("cache", None, None).await.unwrap();
    assert_eq!(cycle.candidates.len(), 3);
    // auto_deploy off: an improving cycle stops at Approved.
    assert_eq!(cycle.status, CycleStatus::Approved);
    assert_eq!(optimizer.current("cache").unwrap().version, 1);

    // The smaller detector floor applies.
    for _ in 0..10 {
        optimizer.record_metric("m", 100.0, None).unwrap();
    }
    // Zero variance still never flags, even above the floor.
    assert!(optimizer.record_metric("m", 100.0, None).unwrap().is_none());
}
