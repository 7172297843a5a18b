// Attach / peek benchmarks for nebula-recall
// Run with: cargo bench --bench attach_hot_path

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nebula_recall::{CacheConfig, ObservableCache, TokioExecutor};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("bench runtime")
}

fn cache(runtime: &Runtime) -> ObservableCache {
    ObservableCache::builder()
        .config(CacheConfig::for_background())
        .executor(TokioExecutor::new(runtime.handle().clone()))
        .build()
        .expect("bench cache")
}

fn benchmark_settled(c: &mut Criterion) {
    let mut group = c.benchmark_group("settled");
    let runtime = runtime();
    let cache = cache(&runtime);

    let warm = cache
        .attach_single("warm", || async { Ok::<_, String>(42u64) })
        .expect("attach");
    runtime.block_on(warm).expect("settle");

    group.bench_function("peek_single", |b| {
        b.iter(|| cache.peek_single::<u64>(black_box("warm")).expect("peek"));
    });

    group.bench_function("attach_replay", |b| {
        b.iter(|| {
            let observer = cache
                .attach_single(black_box("warm"), || async { Ok::<_, String>(0u64) })
                .expect("attach");
            runtime.block_on(observer).expect("replay")
        });
    });

    group.finish();
}

fn benchmark_stream_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_replay");
    let runtime = runtime();
    let cache = cache(&runtime);

    for len in [1usize, 64, 1024] {
        let key = format!("stream-{len}");
        let observer = cache
            .attach_stream(key.as_str(), move || {
                futures::stream::iter((0..len as u64).map(Ok::<_, String>))
            })
            .expect("attach");
        runtime.block_on(futures::StreamExt::count(observer));

        group.bench_with_input(BenchmarkId::from_parameter(len), &key, |b, key| {
            b.iter(|| {
                let replay = cache.peek_stream::<u64>(key).expect("peek").into_option();
                replay.map(|replay| replay.items().len())
            });
        });
    }

    group.finish();
}

fn benchmark_cold_attach(c: &mut Criterion) {
    let runtime = runtime();
    let cache = cache(&runtime);
    let mut next = 0u64;

    c.bench_function("cold_attach_and_settle", |b| {
        b.iter(|| {
            next += 1;
            let observer = cache
                .attach_single(format!("cold-{next}"), move || async move {
                    Ok::<_, String>(next)
                })
                .expect("attach");
            runtime.block_on(observer).expect("settle")
        });
    });
    cache.clear();
}

criterion_group!(
    benches,
    benchmark_settled,
    benchmark_stream_replay,
    benchmark_cold_attach
);
criterion_main!(benches);
