use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use omnistock_core::{Sku, WarehouseId};
use omnistock_events::{DecodePolicy, InMemoryEventLog, InventoryEvent, LogFields};
use omnistock_infra::Allocator;
use omnistock_infra::ledger::{InMemoryStockLedger, StockLedger};
use omnistock_inventory::{Order, WarehouseStock, plan_allocation};
use std::sync::Arc;

fn rows(warehouses: i64) -> Vec<WarehouseStock> {
    (1..=warehouses)
        .map(|wh| WarehouseStock::new(WarehouseId::new(wh), (wh * 7) % 13 + 1))
        .collect()
}

fn bench_plan_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_allocation");

    for warehouses in [2, 10, 100, 1000].iter() {
        let snapshot = rows(*warehouses);
        let total: i64 = snapshot.iter().map(|r| r.quantity).sum();
        group.throughput(Throughput::Elements(*warehouses as u64));
        group.bench_with_input(
            BenchmarkId::new("drain_all", warehouses),
            &snapshot,
            |b, snapshot| {
                b.iter(|| black_box(plan_allocation(black_box(snapshot), total).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_allocate_in_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_in_memory");
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    for warehouses in [1, 5, 25].iter() {
        group.bench_with_input(
            BenchmarkId::new("restock_then_allocate", warehouses),
            warehouses,
            |b, &warehouses| {
                let ledger = InMemoryStockLedger::new();
                let log = Arc::new(InMemoryEventLog::new());
                let allocator = Allocator::new(ledger.clone(), log);
                let sku = Sku::from("BENCH-1");

                b.iter(|| {
                    rt.block_on(async {
                        for wh in 1..=warehouses {
                            ledger
                                .upsert_delta(&sku, WarehouseId::new(wh), 2)
                                .await
                                .unwrap();
                        }
                        let order = Order::new(sku.clone(), "bench", warehouses * 2);
                        black_box(allocator.allocate(&order).await.unwrap());
                    })
                });
            },
        );
    }

    group.finish();
}

fn bench_event_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_decode");

    let clean: LogFields = InventoryEvent::new("SKU-1", WarehouseId::new(3), -2, "web", "order")
        .to_fields()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let mut dirty = clean.clone();
    dirty.insert("change".to_string(), "not-a-number".to_string());
    dirty.remove("warehouse_id");

    for (name, fields) in [("clean", &clean), ("dirty", &dirty)] {
        group.bench_with_input(BenchmarkId::new("lenient", name), fields, |b, fields| {
            b.iter(|| black_box(InventoryEvent::decode(black_box(fields), DecodePolicy::Lenient)));
        });
        group.bench_with_input(BenchmarkId::new("strict", name), fields, |b, fields| {
            b.iter(|| black_box(InventoryEvent::decode(black_box(fields), DecodePolicy::Strict)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_plan_allocation,
    bench_allocate_in_memory,
    bench_event_decode
);
criterion_main!(benches);
