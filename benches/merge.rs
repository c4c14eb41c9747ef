//! Merge-engine benchmarks: aggregation and policy merges over
//! realistically sized collections.

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use fleetfacts::merge::{aggregate, deep_merge, merge_collections};
use fleetfacts::{Fact, FactCollection, FactSource, MergePolicy, Value};

fn collection(server: &str, keys: usize, age_secs: i64) -> FactCollection {
    let mut collection = FactCollection::new(server);
    let timestamp = Utc::now() - Duration::seconds(age_secs);
    for i in 0..keys {
        collection.insert(
            Fact::builder()
                .key(format!("bench.key_{i}"))
                .value(i as i64)
                .source(FactSource::Local)
                .server(server)
                .timestamp(timestamp)
                .build()
                .unwrap(),
        );
    }
    collection
}

fn nested_tree(depth: usize, width: usize, seed: i64) -> Value {
    if depth == 0 {
        return Value::Int(seed);
    }
    let mut map = std::collections::BTreeMap::new();
    for i in 0..width {
        map.insert(
            format!("branch_{i}"),
            nested_tree(depth - 1, width, seed + i as i64),
        );
    }
    Value::Map(map)
}

fn bench_aggregate(c: &mut Criterion) {
    let parts = vec![
        collection("web-01", 200, 120),
        collection("web-01", 200, 60),
        collection("web-01", 200, 0),
    ];

    c.bench_function("aggregate_3_sources_200_keys", |b| {
        b.iter(|| aggregate(black_box("web-01"), black_box(parts.clone())))
    });
}

fn bench_policy_merges(c: &mut Criterion) {
    let existing = collection("web-01", 200, 60);
    let incoming = collection("web-01", 200, 0);

    for policy in [
        MergePolicy::Replace,
        MergePolicy::Merge,
        MergePolicy::Skip,
        MergePolicy::Append,
    ] {
        c.bench_function(&format!("merge_collections_{policy}_200_keys"), |b| {
            b.iter(|| {
                merge_collections(black_box(&existing), black_box(&incoming), black_box(policy))
            })
        });
    }
}

fn bench_deep_merge(c: &mut Criterion) {
    let existing = nested_tree(4, 6, 0);
    let incoming = nested_tree(4, 6, 1);

    c.bench_function("deep_merge_depth4_width6", |b| {
        b.iter(|| deep_merge(black_box(&existing), black_box(&incoming)))
    });
}

criterion_group!(benches, bench_aggregate, bench_policy_merges, bench_deep_merge);
criterion_main!(benches);
