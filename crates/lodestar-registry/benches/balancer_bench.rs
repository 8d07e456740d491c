// Criterion benchmarks for the lodestar-registry load balancers
//
// Run benchmarks with:
//   cargo bench -p lodestar-registry

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lodestar_registry::balance::{
    ConsistentHashBalancer, LeastConnectionBalancer, RoundRobinBalancer,
    WeightedRoundRobinBalancer,
};
use lodestar_registry::{LoadBalancer, ServiceInstance};

fn candidates(n: u16) -> Vec<ServiceInstance> {
    (0..n)
        .map(|i| {
            ServiceInstance::new("Calc", "10.0.0.1", 9000 + i).with_weight(i32::from(i % 5) + 1)
        })
        .collect()
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("balancer_select");

    for size in [3u16, 10, 50] {
        let list = candidates(size);

        let round_robin = RoundRobinBalancer::new();
        group.bench_function(format!("round_robin_{}", size), |b| {
            b.iter(|| round_robin.select(black_box(&list)));
        });

        let weighted = WeightedRoundRobinBalancer::new();
        group.bench_function(format!("weighted_round_robin_{}", size), |b| {
            b.iter(|| weighted.select(black_box(&list)));
        });

        let least_connection = LeastConnectionBalancer::new();
        group.bench_function(format!("least_connection_{}", size), |b| {
            b.iter(|| least_connection.select(black_box(&list)));
        });

        let consistent_hash = ConsistentHashBalancer::default();
        group.bench_function(format!("consistent_hash_{}", size), |b| {
            let mut k = 0u64;
            b.iter(|| {
                k += 1;
                consistent_hash.select_by_key(black_box(&list), &format!("key-{}", k % 128))
            });
        });
    }

    group.finish();
}

fn bench_update_stats(c: &mut Criterion) {
    let balancer = LeastConnectionBalancer::new();
    c.bench_function("least_connection_update_stats_pair", |b| {
        b.iter(|| {
            balancer.update_stats(black_box("10.0.0.1:9000"), true);
            balancer.update_stats(black_box("10.0.0.1:9000"), false);
        });
    });
}

criterion_group!(benches, bench_select, bench_update_stats);
criterion_main!(benches);
