use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, Utc};
use stockledger_core::{PartitionKey, ProductId, SaleId, StoreId, Subject};
use stockledger_events::{InMemoryEventBus, NullEventBus};
use stockledger_infra::{EntryStore, InMemoryEntryStore, LedgerEnvelope, StockLedger};
use stockledger_ledger::{ConsumeRequest, ConsumptionCause, LotSource, ReceiveLot};
use std::sync::Arc;

fn key() -> PartitionKey {
    PartitionKey::new(Subject::Product(ProductId::new(1)), StoreId::new(1))
}

fn seeded(lots: usize) -> StockLedger<InMemoryEntryStore, NullEventBus> {
    let ledger = StockLedger::new(InMemoryEntryStore::new(), NullEventBus);
    let start = Utc::now() - Duration::days(lots as i64);
    for i in 0..lots {
        ledger
            .receive_lot(&ReceiveLot {
                partition: key(),
                quantity: 10,
                unit_cost: 100 + i as i64,
                source: LotSource::Procurement(None),
                occurred_at: start + Duration::days(i as i64),
            })
            .unwrap();
    }
    ledger
}

fn bench_fifo_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_plan");

    for lots in [1usize, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*lots as u64));
        group.bench_with_input(BenchmarkId::new("drain_all_lots", lots), lots, |b, &lots| {
            let ledger = seeded(lots);
            let partition = ledger.store().snapshot(key()).unwrap();
            let demand = lots as i64 * 10;

            b.iter(|| black_box(stockledger_ledger::plan(&partition, black_box(demand)).unwrap()));
        });
    }

    group.finish();
}

fn bench_consume_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("consume_latency");
    group.sample_size(200);

    // One unit per iteration; a fresh lot lands every thousand sales.
    group.bench_function("consume_one_unit", |b| {
        let ledger = seeded(100);
        let mut sale = 0i64;
        b.iter(|| {
            sale += 1;
            if sale % 1000 == 0 {
                ledger
                    .receive_lot(&ReceiveLot {
                        partition: key(),
                        quantity: 1000,
                        unit_cost: 100,
                        source: LotSource::Procurement(None),
                        occurred_at: Utc::now(),
                    })
                    .unwrap();
            }
            let req = ConsumeRequest::new(
                key(),
                black_box(1),
                ConsumptionCause::Sale(SaleId::new(sale)),
                Utc::now(),
            );
            black_box(ledger.consume(&req).unwrap());
        });
    });

    group.bench_function("receive_then_consume_with_bus", |b| {
        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        let ledger = StockLedger::new(InMemoryEntryStore::new(), bus);
        let mut sale = 0i64;
        b.iter(|| {
            sale += 1;
            ledger
                .receive_lot(&ReceiveLot {
                    partition: key(),
                    quantity: 5,
                    unit_cost: 100,
                    source: LotSource::Procurement(None),
                    occurred_at: Utc::now(),
                })
                .unwrap();
            ledger
                .consume(&ConsumeRequest::new(
                    key(),
                    5,
                    ConsumptionCause::Sale(SaleId::new(sale)),
                    Utc::now(),
                ))
                .unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_fifo_plan, bench_consume_latency);
criterion_main!(benches);
