//! Optimizer benchmarks — measures the cost of the hot paths.
//!
//! - Genome hashing: runs once per candidate per cycle (memoization key)
//! - Metric ingest: the per-reading record-and-detect unit
//! - Full evolve cycle: population build, fan-out evaluation, selection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use evotune::clock::ManualClock;
use evotune::config::EvolutionConfig;
use evotune::evolution::fitness_fn;
use evotune::{ComponentGenome, Gene, Optimizer, OptimizerConfig};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn genome_with_genes(count: usize) -> ComponentGenome {
    let mut genome = ComponentGenome::new("bench", 0);
    for i in 0..count {
        genome = match i % 3 {
            0 => genome.with_gene(format!("num_{i}"), Gene::numeric(i as f64 + 0.5)),
            1 => genome.with_gene(format!("flag_{i}"), Gene::boolean(i % 2 == 0)),
            _ => genome.with_gene(
                format!("mode_{i}"),
                Gene::categorical("a", vec!["a".into(), "b".into(), "c".into()]),
            ),
        };
    }
    genome
}

fn seeded_optimizer() -> Optimizer {
    let optimizer = Optimizer::with_clock(
        OptimizerConfig::default(),
        42,
        Arc::new(ManualClock::new(1_000)),
    );
    for i in 0..120 {
        let value = if i % 2 == 0 { 95.0 } else { 105.0 };
        optimizer
            .record_metric("latency_ms", value, None)
            .expect("seed");
    }
    optimizer
}

// ---------------------------------------------------------------------------
// Bench: genome hashing at various gene counts
// ---------------------------------------------------------------------------

fn bench_genome_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("genome_hash");

    for count in [4usize, 16, 64] {
        let genome = genome_with_genes(count);
        group.bench_with_input(BenchmarkId::new("genes", count), &genome, |b, genome| {
            b.iter(|| black_box(genome.hash()))
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: metric ingest — one in-band reading against a full window
// ---------------------------------------------------------------------------

fn bench_metric_ingest(c: &mut Criterion) {
    let optimizer = seeded_optimizer();

    c.bench_function("metric_ingest_in_band", |b| {
        b.iter(|| {
            let result = optimizer.record_metric("latency_ms", black_box(101.0), None);
            black_box(result)
        })
    });
}

// ---------------------------------------------------------------------------
// Bench: batch ingest at various batch sizes
// ---------------------------------------------------------------------------

fn bench_record_batch(c: &mut Criterion) {
    let optimizer = seeded_optimizer();

    let mut group = c.benchmark_group("record_batch");
    for size in [10usize, 100] {
        let readings: Vec<(String, f64)> = (0..size)
            .map(|i| (format!("metric_{}", i % 8), 100.0 + (i % 10) as f64))
            .collect();
        group.bench_with_input(BenchmarkId::new("readings", size), &readings, |b, r| {
            b.iter(|| black_box(optimizer.record_batch(r)))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Bench: window statistics over a full window
// ---------------------------------------------------------------------------

fn bench_window_stats(c: &mut Criterion) {
    let optimizer = seeded_optimizer();

    c.bench_function("window_stats", |b| {
        b.iter(|| black_box(optimizer.stats(black_box("latency_ms"))))
    });
}

// ---------------------------------------------------------------------------
// Bench: one full evolve cycle (population, evaluation fan-out, selection)
// ---------------------------------------------------------------------------

fn bench_full_evolve_cycle(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("evolve_cycle");
    group.sample_size(20);

    for population in [5usize, 10, 20] {
        group.bench_with_input(
            BenchmarkId::new("population", population),
            &population,
            |b, &population| {
                b.to_async(&rt).iter(|| async move {
                    let config = OptimizerConfig {
                        evolution: EvolutionConfig {
                            population_size: population,
                            auto_deploy: false,
                            ..EvolutionConfig::default()
                        },
                        ..OptimizerConfig::default()
                    };
                    let optimizer =
                        Optimizer::with_clock(config, 42, Arc::new(ManualClock::new(0)));
                    optimizer
                        .register(
                            ComponentGenome::new("bench", 0)
                                .with_gene("threshold", Gene::numeric(0.5))
                                .with_gene("retries", Gene::numeric_bounded(3.0, 0.0, 10.0)),
                        )
                        .expect("register");
                    optimizer
                        .register_fitness_evaluator(
                            "default",
                            fitness_fn(|genome| {
                                Ok(genome
                                    .gene("threshold")
                                    .and_then(Gene::as_f64)
                                    .unwrap_or(0.0)
                                    .clamp(0.0, 1.0))
                            }),
                        )
                        .expect("evaluator");

                    let cycle = optimizer.evolve("bench", None, None).await.expect("cycle");
                    black_box(cycle)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    optimizer_benches,
    bench_genome_hash,
    bench_metric_ingest,
    bench_record_batch,
    bench_window_stats,
    bench_full_evolve_cycle,
);
criterion_main!(optimizer_benches);
