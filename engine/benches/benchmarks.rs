//! Performance benchmarks for offsync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use offsync_engine::{
    network, CacheConfig, Connectivity, InMemoryRemote, LocalRecord, LocalStore, ManualClock,
    MemoryStore, RecordFilter, SyncConfig, SyncEngine, SyncResult, TtlCache, WriteMode,
};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    group.bench_function("set_below_capacity", |b| {
        let (_, clock) = ManualClock::shared(0);
        let mut cache = TtlCache::new(CacheConfig::default().with_capacity(usize::MAX), clock);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            cache.set(format!("diaries_user{i}"), black_box(json!({"n": i})));
        })
    });

    // Every insert into a full cache triggers an eviction batch.
    for capacity in [100, 1_000, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("set_at_capacity", capacity),
            capacity,
            |b, &capacity| {
                let (_, clock) = ManualClock::shared(0);
                let mut cache = TtlCache::new(CacheConfig::default().with_capacity(capacity), clock);
                for i in 0..capacity {
                    cache.set(format!("warm_{i}"), i);
                }
                let mut i = 0usize;
                b.iter(|| {
                    i += 1;
                    cache.set(format!("diaries_user{i}"), black_box(i));
                })
            },
        );
    }

    group.bench_function("get_hit", |b| {
        let (_, clock) = ManualClock::shared(0);
        let mut cache = TtlCache::new(CacheConfig::default(), clock);
        for i in 0..100 {
            cache.set(format!("diaries_user{i}"), json!({"n": i}));
        }
        b.iter(|| cache.get(black_box("diaries_user50")))
    });

    group.bench_function("invalidate_by_pattern", |b| {
        let (_, clock) = ManualClock::shared(0);
        let mut cache = TtlCache::new(CacheConfig::default().with_capacity(1_000), clock);
        b.iter(|| {
            for i in 0..100 {
                cache.set(format!("diaries_user{}_page={i}", i % 10), i);
            }
            cache.invalidate_by_pattern(black_box("diaries_user3"))
        })
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("memory_store");

    group.bench_function("put_local", |b| {
        let (_, clock) = ManualClock::shared(0);
        let store = MemoryStore::new(clock);
        b.iter(|| {
            rt.block_on(store.put(
                LocalRecord::new_local("user1", json!({"title": "entry"}), 0),
                WriteMode::Local,
            ))
        })
    });

    group.bench_function("query_pending_1000", |b| {
        let (_, clock) = ManualClock::shared(0);
        let store = MemoryStore::new(clock);
        rt.block_on(async {
            for i in 0..1_000u64 {
                let mode = if i % 2 == 0 {
                    WriteMode::Local
                } else {
                    WriteMode::Synced
                };
                let _ = store
                    .put(LocalRecord::new_local("user1", json!({"n": i}), i), mode)
                    .await;
            }
        });
        b.iter(|| rt.block_on(store.query(black_box("user1"), RecordFilter::Pending)))
    });

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("sync");

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("push_creates", size), size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let (_, clock) = ManualClock::shared(1_000);
                    let store = Arc::new(MemoryStore::new(clock.clone()));
                    for i in 0..size {
                        let _ = store
                            .put(
                                LocalRecord::new_local("user1", json!({"n": i}), 1_000),
                                WriteMode::Local,
                            )
                            .await;
                    }
                    let remote = Arc::new(InMemoryRemote::new(clock.clone()));
                    let cache = TtlCache::shared(CacheConfig::default(), clock);
                    let (_online, rx) = network::channel(Connectivity::Online);
                    let engine = SyncEngine::new(store, remote, cache, rx, SyncConfig::default());
                    engine.sync(black_box("user1")).await
                })
            })
        });
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    group.bench_function("record_to_json", |b| {
        let record = LocalRecord::new_local(
            "user1",
            json!({"title": "Test entry", "content": "Lorem ipsum", "tags": ["a", "b"]}),
            1_000,
        );
        b.iter(|| serde_json::to_string(black_box(&record)))
    });

    group.bench_function("sync_result_from_json", |b| {
        let json = r#"{"success":false,"syncedCount":3,"errors":["record 4: remote request failed: 503"],"conflicts":1}"#;
        b.iter(|| serde_json::from_str::<SyncResult>(black_box(json)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cache,
    bench_store,
    bench_sync,
    bench_serialization,
);
criterion_main!(benches);
