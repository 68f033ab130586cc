// Registry benchmarks for the Agora marketplace.
//
// Covers listing throughput and the full purchase path (checks, ledger
// transfer, ownership flip) against an in-memory ledger.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use agora_contracts::ProductRegistry;
use agora_protocol::identity::Address;
use agora_protocol::vault::Ledger;

fn bench_create_product(c: &mut Criterion) {
    let seller = Address::from_bytes([0x5E; 20]);

    c.bench_function("registry/create_product", |b| {
        let mut registry = ProductRegistry::new();
        b.iter(|| registry.create_product("I Phone X", 1_000, seller));
    });
}

fn bench_purchase_batch(c: &mut Criterion) {
    let seller = Address::from_bytes([0x5E; 20]);
    let buyer = Address::from_bytes([0xB7; 20]);
    let mut group = c.benchmark_group("registry/purchase_batch");

    for size in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let mut registry = ProductRegistry::new();
                    for i in 0..size {
                        registry
                            .create_product(format!("item-{i}"), 1_000, seller)
                            .expect("valid listing");
                    }
                    let mut ledger = Ledger::new();
                    ledger.set_balance(buyer, u128::from(size) * 1_000);
                    (registry, ledger)
                },
                |(mut registry, mut ledger)| {
                    for id in 1..=size {
                        registry
                            .purchase_product(id, buyer, 1_000, &mut ledger)
                            .expect("funded purchase");
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_create_product, bench_purchase_batch);
criterion_main!(benches);
