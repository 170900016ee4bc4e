//! Criterion benchmarks for the SQLite state backend.
//!
//! These measure the writes every stage performs (run upserts) and the
//! lead lookups done once per discovery.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use funnel_state::{SqliteStateBackend, StateBackend};
use funnel_types::{Filters, Platform, Profile, Run};

fn profiles(prefix: &str, count: usize) -> Vec<Profile> {
    (0..count)
        .map(|i| Profile::new(format!("{prefix}-{i}"), Platform::Patreon).with_handle(format!("{prefix}_{i}")))
        .collect()
}

fn bench_save_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/save_run");

    group.bench_function("upsert", |b| {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let mut run = Run::new(Platform::Patreon, Filters::new());

        b.iter(|| {
            run.add_cost(0.01);
            backend.save_run(&run).unwrap();
        });
    });

    group.finish();
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/dedup_profiles");

    for known in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("known_leads", known), &known, |b, &known| {
            let backend = SqliteStateBackend::in_memory().unwrap();
            let seed = Run::new(Platform::Patreon, Filters::new());
            backend.persist_lead_results(&seed, &profiles("lead", known)).unwrap();
            let batch = profiles("lead", 100);

            b.iter(|| {
                let (_fresh, _dupes) = backend
                    .dedup_profiles(batch.clone(), Platform::Patreon)
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_persist_lead_results(c: &mut Criterion) {
    let mut group = c.benchmark_group("state/persist_lead_results");

    for count in [10, 100] {
        group.bench_with_input(BenchmarkId::new("profiles", count), &count, |b, &count| {
            let backend = SqliteStateBackend::in_memory().unwrap();
            let batch = profiles("synced", count);

            b.iter(|| {
                let run = Run::new(Platform::Patreon, Filters::new());
                backend.persist_lead_results(&run, &batch).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_save_run,
    bench_dedup,
    bench_persist_lead_results
);
criterion_main!(benches);
