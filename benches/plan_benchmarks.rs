//! Plan compilation and policy evaluation benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use costguard::model::{RecommendationRecord, ResourceKind};
use costguard::plan;
use costguard::policy::{PolicyEngine, PolicyTable, ResourceDescriptor};
use std::hint::black_box;
use std::time::Duration;

fn records(count: usize) -> Vec<RecommendationRecord> {
    (0..count)
        .map(|i| match i % 3 {
            0 => RecommendationRecord::new(ResourceKind::Compute, format!("i-{i:05}"))
                .with_current("instance_type", "r5.large")
                .with_suggested("instance_type", "t3.medium")
                .with_savings("$50.00"),
            1 => RecommendationRecord::new(ResourceKind::BlockVolume, format!("vol-{i:05}"))
                .with_current("volume_type", "io1")
                .with_suggested("volume_type", "gp3")
                .with_savings("$1,204.10"),
            _ => RecommendationRecord::new(ResourceKind::Function, format!("fn-{i:05}"))
                .with_current("memory_mb", "10240")
                .with_suggested("memory_mb", "1024")
                .with_savings("unknown"),
        })
        .collect()
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_compile");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    for size in [10, 100, 1_000, 10_000].iter() {
        let input = records(*size);
        group.bench_with_input(BenchmarkId::new("compile", size), &input, |b, input| {
            b.iter(|| plan::compile(black_box(input)))
        });
    }

    group.finish();
}

fn bench_policy(c: &mut Criterion) {
    let engine = PolicyEngine::new(PolicyTable::builtin());
    let resources: Vec<ResourceDescriptor> = ["t3.micro", "t3.xlarge", "r5.large", "c6i.2xlarge"]
        .iter()
        .map(|t| ResourceDescriptor::new(ResourceKind::Compute, "i-1").with("instance_type", *t))
        .collect();

    c.bench_function("policy_evaluate", |b| {
        b.iter(|| {
            for resource in &resources {
                black_box(engine.evaluate(black_box(resource)));
            }
        })
    });

    let input = records(1_000);
    c.bench_function("policy_annotate_1000", |b| {
        b.iter(|| engine.annotate(black_box(input.clone())))
    });
}

criterion_group!(benches, bench_compile, bench_policy);
criterion_main!(benches);
