use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use leaksentinel::callstack::CallStack;
use leaksentinel::classify;
use leaksentinel::classify_and_render;
use leaksentinel::config::Config;
use leaksentinel::leak_kind::LeakKind;
use leaksentinel::record::AllocationRecord;
use leaksentinel::thread_registry::ThreadRegistry;

/// Builds `count` synthetic allocations with no pointers between them, so
/// every one of them ends up classified `lost` — the worst case for the
/// scanner's word-scan passes, since nothing short-circuits a match. Each
/// backs real, page-resident memory (leaked deliberately): the scanner
/// reads these bytes, and a dangling synthetic pointer would make that
/// read undefined behavior.
fn unreachable_records(count: usize) -> Vec<AllocationRecord> {
    (0..count)
        .map(|_| {
            let leaked = Box::leak(Box::new([0u8; 64]));
            AllocationRecord::new(leaked.as_ptr() as usize, leaked.len(), 1, CallStack::capture(4))
        })
        .collect()
}

fn bench_classify_and_render(c: &mut Criterion) {
    let config = Config::default();
    let mut group = c.benchmark_group("classify_and_render over synthetic lost allocations");

    for &count in &[100usize, 1_000, 10_000] {
        group.bench_function(format!("{count} records"), |b| {
            b.iter_batched(
                || {
                    let registry = ThreadRegistry::new();
                    registry.register_current_thread(1);
                    (registry, unreachable_records(count))
                },
                |(registry, records)| {
                    let (report, stats) = classify_and_render(black_box(records), &registry, &config);
                    black_box((report, stats));
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

/// The per-record reachability walk (`classify_record_graph`) in isolation,
/// without the surrounding scan or report — the inner loop every scan pass
/// drives once a candidate pointer matches a live allocation.
fn bench_classify_record_graph(c: &mut Criterion) {
    c.bench_function("classify_record_graph over a single leaf allocation", |b| {
        b.iter_batched(
            || {
                let leaked = Box::leak(Box::new([0u8; 64]));
                let record = AllocationRecord::new(leaked.as_ptr() as usize, leaked.len(), 1, CallStack::capture(4));
                classify::RecordArena::new(vec![record])
            },
            |mut arena| unsafe {
                classify::classify_record_graph(&mut arena, 0, LeakKind::UnreachableIndirect, false);
                black_box(arena);
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .significance_level(0.02)
        .noise_threshold(0.05)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));
    targets = bench_classify_and_render, bench_classify_record_graph
);
criterion_main!(benches);
