use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hire_query::{
    CacheEntry, KeyPattern, ResourceCache, ResourceKey, ResourceKind, ResourcePolicy,
    StalenessPolicy,
};
use std::time::Duration;
use tokio::runtime::Runtime;

#[derive(Clone)]
struct Candidate {
    id: u64,
    name: String,
}

fn candidate_keys(count: u64) -> Vec<ResourceKey> {
    (0..count)
        .map(|id| ResourceKey::entity(ResourceKind::Candidate, id))
        .collect()
}

/// Populate `cache` with one settled entry per key.
fn warm(rt: &Runtime, cache: &ResourceCache, keys: &[ResourceKey], policy: &ResourcePolicy) {
    rt.block_on(async {
        for (id, key) in keys.iter().enumerate() {
            let _: CacheEntry<Candidate> = cache
                .read_settled(
                    key,
                    move || async move {
                        Ok(Candidate {
                            id: id as u64,
                            name: format!("candidate-{}", id),
                        })
                    },
                    policy,
                )
                .await;
        }
    });
}

/// Benchmark 1: Hot reads (all fresh, no fetch scheduled)
fn bench_hot_reads(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("hot_reads");
    let policy = ResourcePolicy::new(StalenessPolicy::max_age(Duration::from_secs(300)));

    for size in [100u64, 1_000, 10_000] {
        let cache = ResourceCache::new();
        let keys = candidate_keys(size);
        warm(&rt, &cache, &keys, &policy);

        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("read", size), &keys, |b, keys| {
            let _guard = rt.enter();
            b.iter(|| {
                for key in keys {
                    let entry: CacheEntry<Candidate> = cache.read(
                        key,
                        || async { Err(hire_query::ApiError::network("unreachable")) },
                        &policy,
                    );
                    black_box(entry.value.map(|c| (c.id, c.name.len())));
                }
            });
        });
    }
    group.finish();
}

/// Benchmark 2: Invalidation sweep (kind pattern over unsubscribed entries)
fn bench_invalidation_sweep(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("invalidation_sweep");
    let policy = ResourcePolicy::new(StalenessPolicy::never());

    for size in [100u64, 1_000, 10_000] {
        let cache = ResourceCache::new();
        let keys = candidate_keys(size);
        warm(&rt, &cache, &keys, &policy);

        group.throughput(Throughput::Elements(size));
        group.bench_function(BenchmarkId::new("kind", size), |b| {
            let _guard = rt.enter();
            b.iter(|| black_box(cache.invalidate(&KeyPattern::Kind(ResourceKind::Candidate))));
        });
        group.bench_function(BenchmarkId::new("entity", size), |b| {
            let _guard = rt.enter();
            b.iter(|| {
                black_box(cache.invalidate(&KeyPattern::Entity(
                    ResourceKind::Candidate,
                    (size / 2).to_string(),
                )))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_hot_reads, bench_invalidation_sweep);
criterion_main!(benches);
