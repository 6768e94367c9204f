use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use alphaplan::{
    AlphaVector, BeliefState, ExecutorConfig, LpWitnessOracle, StoreConfig, TaskExecutor,
    ValueFunctionStore,
};

const STATES: usize = 16;

fn random_vectors(count: usize, seed: u64) -> Vec<Arc<AlphaVector>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|a| {
            let coefficients = (0..STATES).map(|_| rng.gen_range(-10.0..10.0)).collect();
            Arc::new(AlphaVector::new(a, coefficients).unwrap())
        })
        .collect()
}

fn random_beliefs(count: usize, seed: u64) -> Vec<BeliefState> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let weights: Vec<f64> = (0..STATES).map(|_| rng.gen_range(0.0..1.0)).collect();
            BeliefState::from_dense(&weights).unwrap()
        })
        .collect()
}

fn store(config: StoreConfig, vectors: &[Arc<AlphaVector>]) -> ValueFunctionStore {
    let store = ValueFunctionStore::new(STATES, config).unwrap();
    store.add_all(vectors.iter().map(|v| Arc::new(v.duplicate()))).unwrap();
    store
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_max_alpha");
    group.throughput(Throughput::Elements(1));
    let beliefs = random_beliefs(64, 1);

    for size in [64usize, 1024, 4096] {
        let vectors = random_vectors(size, 7);

        group.bench_with_input(BenchmarkId::new("full_scan", size), &size, |b, _| {
            let s = store(
                StoreConfig {
                    caching: false,
                    ..StoreConfig::default()
                },
                &vectors,
            );
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % beliefs.len();
                s.get_max_alpha(&beliefs[i]).unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("cached", size), &size, |b, _| {
            let s = store(StoreConfig::default(), &vectors);
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % beliefs.len();
                s.value_at(&beliefs[i]).unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("parallel", size), &size, |b, _| {
            let executor = Arc::new(
                TaskExecutor::new(ExecutorConfig {
                    wait_poll_interval: Duration::from_millis(1),
                    ..ExecutorConfig::default()
                })
                .unwrap(),
            );
            let s = store(
                StoreConfig {
                    caching: false,
                    parallel_threshold: 512,
                    chunk_size: 256,
                    ..StoreConfig::default()
                },
                &vectors,
            )
            .with_executor(executor);
            let mut i = 0usize;
            b.iter(|| {
                i = (i + 1) % beliefs.len();
                s.get_max_alpha(&beliefs[i]).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_pruning(c: &mut Criterion) {
    let mut group = c.benchmark_group("pruning");
    group.sample_size(10);
    let vectors = random_vectors(128, 3);

    group.bench_function("pointwise_dominated", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let s = store(StoreConfig::default(), &vectors);
                let start = Instant::now();
                s.prune_pointwise_dominated().unwrap();
                total += start.elapsed();
            }
            total
        });
    });

    group.bench_function("exact_witness_lp", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                let s = store(StoreConfig::default(), &vectors);
                let start = Instant::now();
                s.prune_exact_witness(&LpWitnessOracle).unwrap();
                total += start.elapsed();
            }
            total
        });
    });

    group.finish();
}

criterion_group!(evaluation, bench_lookup, bench_pruning);
criterion_main!(evaluation);
