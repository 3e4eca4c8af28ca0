//! Dispatch latency against plan size

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use costguard::dispatch::{ChannelQueue, Dispatcher};
use costguard::model::{RecommendationRecord, ResourceKind};
use costguard::policy::{PolicyEngine, PolicyTable};
use costguard::retry::RetryConfig;
use costguard::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn compute_records(count: usize) -> Vec<RecommendationRecord> {
    (0..count)
        .map(|i| {
            RecommendationRecord::new(ResourceKind::Compute, format!("i-{i:05}"))
                .with_current("instance_type", "m5.xlarge")
                .with_suggested("instance_type", "t3.medium")
                .with_savings("$70.00")
        })
        .collect()
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("dispatch");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    for size in [1, 100, 1_000].iter() {
        group.bench_with_input(BenchmarkId::new("accept", size), size, |b, &size| {
            b.to_async(&rt).iter_batched(
                || {
                    let (queue, receiver) = ChannelQueue::new(1);
                    let dispatcher = Dispatcher::new(
                        Arc::new(PolicyEngine::new(PolicyTable::builtin())),
                        Arc::new(MemoryStore::new()),
                        Arc::new(queue),
                        RetryConfig::default(),
                    );
                    (dispatcher, receiver, compute_records(size))
                },
                |(dispatcher, receiver, records)| async move {
                    let receipt = dispatcher.dispatch(records, "execute", None).await.unwrap();
                    drop(receiver);
                    receipt
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
