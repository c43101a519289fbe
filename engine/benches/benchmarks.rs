//! Performance benchmarks for replimap-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use replimap_engine::{
    apply_delta, compute_delta, MapConfig, ObserverBaseline, RecordKey, RecordStore, RecordValue,
    ReplicaBaseline, ReplicatedMap, StringInt, StringIntFloat,
};

fn populated_store(size: usize) -> RecordStore {
    let mut store = RecordStore::new();
    for i in 0..size {
        store.add_or_update(
            RecordKey::new(format!("player_{}", i)),
            RecordValue::new(StringInt::new("score", i as i64)),
        );
    }
    store
}

fn bench_store_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_operations");

    group.bench_function("add", |b| {
        let mut store = RecordStore::new();
        let mut id = 0i64;

        b.iter(|| {
            id += 1;
            store.add_or_update(black_box(RecordKey::new(id)), black_box(RecordValue::new(id)))
        })
    });

    group.bench_function("update", |b| {
        let mut store = populated_store(1000);
        let key = RecordKey::new("player_500");
        let mut n = 0i64;

        b.iter(|| {
            n += 1;
            store.add_or_update(
                black_box(key.clone()),
                black_box(RecordValue::new(StringInt::new("score", n))),
            )
        })
    });

    group.bench_function("find", |b| {
        let store = populated_store(1000);
        let key = RecordKey::new("player_500");

        b.iter(|| store.find(black_box(&key)))
    });

    group.bench_function("hash_composite_key", |b| {
        let value = RecordValue::new(StringIntFloat::new("position", 42, 0.5));

        b.iter(|| black_box(&value).value().fingerprint())
    });

    group.finish();
}

fn bench_compute_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_delta");

    for size in [100, 1000, 5000].iter() {
        group.bench_with_input(BenchmarkId::new("from_empty", size), size, |b, &size| {
            let store = populated_store(size);
            let baseline = ObserverBaseline::new();

            b.iter(|| compute_delta(black_box(&store), black_box(&baseline)))
        });

        group.bench_with_input(BenchmarkId::new("ten_changes", size), size, |b, &size| {
            let mut store = populated_store(size);
            let mut baseline = ObserverBaseline::new();
            let batch = compute_delta(&store, &baseline);
            baseline.record_sent(&batch);
            baseline.acknowledge(batch.target_version);

            for i in 0..10 {
                store.add_or_update(
                    RecordKey::new(format!("player_{}", i)),
                    RecordValue::new(StringInt::new("score", -1)),
                );
            }

            b.iter(|| compute_delta(black_box(&store), black_box(&baseline)))
        });
    }

    group.finish();
}

fn bench_apply_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_delta");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("initial", size), size, |b, &size| {
            let batch = compute_delta(&populated_store(size), &ObserverBaseline::new());

            b.iter(|| {
                let mut replica = RecordStore::new();
                let mut baseline = ReplicaBaseline::new();
                apply_delta(&mut replica, &mut baseline, black_box(&batch))
            })
        });
    }

    group.finish();
}

fn bench_replication_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("replication_round");

    for observers in [1, 16, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("prepare_all", observers),
            observers,
            |b, &observers| {
                let mut authority = ReplicatedMap::authority(MapConfig::default());
                for i in 0..observers {
                    let _ = authority.add_observer(format!("observer_{}", i));
                }
                let mut n = 0i64;

                b.iter(|| {
                    n += 1;
                    let _ = authority.set_data(RecordKey::new(n % 100), RecordValue::new(n));
                    authority.prepare_all_deltas()
                })
            },
        );
    }

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");

    let batch = compute_delta(&populated_store(100), &ObserverBaseline::new());

    group.bench_function("batch_to_json", |b| {
        b.iter(|| serde_json::to_string(black_box(&batch)))
    });

    group.bench_function("batch_from_json", |b| {
        let json = serde_json::to_string(&batch).unwrap_or_default();

        b.iter(|| serde_json::from_str::<replimap_engine::DeltaBatch>(black_box(&json)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_store_operations,
    bench_compute_delta,
    bench_apply_delta,
    bench_replication_round,
    bench_serialization,
);
criterion_main!(benches);
