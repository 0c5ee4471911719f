use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use shieldq::{
    core::queue::OperationQueue,
    operation::{OperationRequest, Outcome, Recipient},
    policy::ValidationPolicy,
    types::PoolType,
    upgrade::{UpgradeId, UpgradeSchedule},
};

fn request(i: u32) -> OperationRequest {
    match i % 3 {
        0 => OperationRequest::shield_coinbase(PoolType::Sapling, i),
        1 => OperationRequest::send_many(PoolType::Sapling, vec![Recipient::pay(PoolType::Orchard, 10)], i),
        _ => OperationRequest::merge_to_address(vec![PoolType::Transparent], PoolType::Sprout, i),
    }
}

fn bench_submits(c: &mut Criterion) {
    c.bench_function("queue_submit_50k", |b| {
        b.iter(|| {
            let queue = OperationQueue::new();
            for i in 0..50_000u32 {
                let _ = queue.submit(request(i), i);
            }
        });
    });
}

fn bench_lifecycle(c: &mut Criterion) {
    c.bench_function("queue_lifecycle_10k", |b| {
        b.iter(|| {
            let queue = OperationQueue::new();
            for i in 0..10_000u32 {
                let (id, _) = queue.submit(request(i), i);
                queue.mark_executing(id, i + 1).expect("executing");
                queue
                    .complete(id, Outcome::Succeeded(String::new()), i + 1)
                    .expect("complete");
            }
        });
    });
}

fn bench_policy(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy_evaluate");
    let policy = ValidationPolicy::new(Arc::new(UpgradeSchedule::mainnet()), UpgradeId::Canopy);
    let requests: Vec<_> = (0..3).map(request).collect();

    for height in [1_000_000u32, 1_046_400, 2_000_000] {
        group.bench_with_input(BenchmarkId::from_parameter(height), &height, |b, &height| {
            b.iter(|| {
                for req in &requests {
                    let _ = policy.evaluate(req, height);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submits, bench_lifecycle, bench_policy);
criterion_main!(benches);
