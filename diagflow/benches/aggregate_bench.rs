//! Benchmarks for phase aggregation and reconciliation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use diagflow::core::{aggregate_phase, NodeJob, NodePhase, RemoteJobId};
use diagflow::node::NodeStatusReport;
use diagflow::tracker::reconcile;

fn phases(n: usize) -> Vec<NodePhase> {
    (0..n)
        .map(|i| match i % 5 {
            0 => NodePhase::Running,
            1 | 2 => NodePhase::Succeeded,
            3 => NodePhase::Failed,
            _ => NodePhase::TimedOut,
        })
        .collect()
}

fn aggregate_benchmark(c: &mut Criterion) {
    let small = phases(5);
    let large = phases(1_000);

    c.bench_function("aggregate_5_nodes", |b| {
        b.iter(|| aggregate_phase(black_box(small.iter().copied())));
    });
    c.bench_function("aggregate_1000_nodes", |b| {
        b.iter(|| aggregate_phase(black_box(large.iter().copied())));
    });
}

fn reconcile_benchmark(c: &mut Criterion) {
    let job = NodeJob::running("10.0.0.1", RemoteJobId("job-1".into()));
    let report = NodeStatusReport::succeeded("job-1.zip");

    c.bench_function("reconcile_success", |b| {
        b.iter(|| reconcile(black_box(&job), black_box(&report)));
    });
}

criterion_group!(benches, aggregate_benchmark, reconcile_benchmark);
criterion_main!(benches);
