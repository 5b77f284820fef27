//! Integration tests for the full ledger pipeline.
//!
//! Tests: Request → StockLedger → EntryStore → EventBus
//!
//! Verifies:
//! - Committed operations are visible to readers and published in order
//! - Rejected operations leave no entries and publish nothing
//! - Concurrent writers on one partition never overdraw it
//! - Multi-partition transactions in opposite orders do not deadlock

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::thread;
    use std::time::Duration;

    use chrono::{Duration as Days, Utc};

    use stockledger_core::{
        ConflictReason, LedgerError, PartitionKey, ProductId, ProductionId, SaleId, StoreId,
        Subject, SupplyId,
    };
    use stockledger_events::{EventBus, InMemoryEventBus, Subscription};
    use stockledger_ledger::{
        AnnulEntry, ConsumeRequest, ConsumptionCause, CorrectEntry, EntryStatus, Ingredient,
        LedgerEvent, LotSource, ProductionRun, ReceiveLot, RecordAdjustment, SaleFulfillment,
        SaleLine,
    };

    use crate::ledger_service::{LedgerEnvelope, StockLedger};
    use crate::retry::RetryPolicy;
    use crate::store::{EntryStore, InMemoryEntryStore};

    type Service = StockLedger<Arc<InMemoryEntryStore>, Arc<InMemoryEventBus<LedgerEnvelope>>>;

    fn product(id: i64) -> PartitionKey {
        PartitionKey::new(Subject::Product(ProductId::new(id)), StoreId::new(1))
    }

    fn supply(id: i64) -> PartitionKey {
        PartitionKey::new(Subject::Supply(SupplyId::new(id)), StoreId::new(1))
    }

    fn setup() -> (Service, Subscription<LedgerEnvelope>) {
        let store = Arc::new(InMemoryEntryStore::with_lock_wait(Duration::from_millis(200)));
        let bus: Arc<InMemoryEventBus<LedgerEnvelope>> = Arc::new(InMemoryEventBus::new());
        // Subscribe before anything is published.
        let subscription = bus.subscribe();
        let service = StockLedger::new(store, bus).with_retry(RetryPolicy::new(50, 1, 10, 0.5));
        (service, subscription)
    }

    fn receive(service: &Service, key: PartitionKey, quantity: i64, unit_cost: i64, days_ago: i64) -> stockledger_core::EntryId {
        service
            .receive_lot(&ReceiveLot {
                partition: key,
                quantity,
                unit_cost,
                source: LotSource::Procurement(None),
                occurred_at: Utc::now() - Days::days(days_ago),
            })
            .unwrap()
    }

    fn event_types(subscription: &Subscription<LedgerEnvelope>) -> Vec<String> {
        subscription
            .drain()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }

    #[test]
    fn consumption_is_committed_then_published() {
        let (service, subscription) = setup();
        let key = product(1);
        let a = receive(&service, key, 10, 100, 2);
        receive(&service, key, 10, 120, 1);

        let allocation = service
            .consume(&ConsumeRequest::new(key, 15, ConsumptionCause::withdrawal("stocktake"), Utc::now()))
            .unwrap();
        assert_eq!(allocation.total_cost(), 10 * 100 + 5 * 120);
        assert_eq!(service.current_available(key).unwrap(), 5);

        let lots = service.list_lots(key, true).unwrap();
        assert_eq!(lots[0].id, a);
        assert_eq!(lots[0].status, EntryStatus::Exhausted);

        assert_eq!(
            event_types(&subscription),
            vec![
                "ledger.lot.received",
                "ledger.lot.received",
                "ledger.lot.exhausted",
                "ledger.stock.consumed",
            ]
        );
    }

    #[test]
    fn shortfall_changes_nothing_and_publishes_nothing() {
        let (service, subscription) = setup();
        let key = product(1);
        receive(&service, key, 5, 100, 0);
        subscription.drain();

        let result = service.consume(&ConsumeRequest::new(
            key,
            100,
            ConsumptionCause::Sale(SaleId::new(1)),
            Utc::now(),
        ));
        assert!(matches!(result, Err(LedgerError::InsufficientStock { shortfall: 95, .. })));
        assert_eq!(service.store().snapshot(key).unwrap().len(), 1);
        assert!(subscription.drain().is_empty());
    }

    #[test]
    fn correction_and_annulment_resolve_the_partition_by_entry_id() {
        let (service, subscription) = setup();
        let key = supply(4);
        let lot = receive(&service, key, 10, 30, 0);
        let adjustment = service
            .record_adjustment(&RecordAdjustment::decrease(key, 2, Some(lot), "spilled", Utc::now()))
            .unwrap();
        let shrink = adjustment.entries()[0];

        let fixed = service
            .correct(&CorrectEntry {
                entry: shrink,
                quantity: -3,
                unit_cost: None,
                reason: "recount".to_string(),
            })
            .unwrap();
        assert_eq!(service.current_available(key).unwrap(), 7);

        let history = service.entry_history(fixed.replacement).unwrap();
        assert_eq!(history.replaces[0].id, shrink);
        assert_eq!(history.replaces[0].status, EntryStatus::Superseded);

        service
            .annul(&AnnulEntry {
                entry: fixed.replacement,
                reason: "never happened".to_string(),
            })
            .unwrap();
        assert_eq!(service.current_available(key).unwrap(), 10);
        assert!(matches!(
            service.entry_history(fixed.replacement),
            Err(LedgerError::NotFound(_))
        ));

        let published = subscription.drain();
        assert!(published.iter().any(|e| matches!(e.payload(), LedgerEvent::EntryCorrected(_))));
        assert!(published.iter().any(|e| matches!(e.payload(), LedgerEvent::EntryAnnulled(_))));
    }

    #[test]
    fn sale_consumptions_cannot_be_annulled() {
        let (service, _subscription) = setup();
        let key = product(1);
        receive(&service, key, 10, 100, 0);
        let outcome = service
            .fulfill_sale(&SaleFulfillment {
                sale: SaleId::new(42),
                store: StoreId::new(1),
                lines: vec![SaleLine { product: ProductId::new(1), quantity: 2 }],
                occurred_at: Utc::now(),
            })
            .unwrap();
        let sold = outcome.lines[0].draws[0].entry;

        assert_eq!(
            service.annul(&AnnulEntry { entry: sold, reason: "refund".to_string() }),
            Err(LedgerError::Conflict(ConflictReason::SaleLinked))
        );
        assert_eq!(service.current_available(key).unwrap(), 8);
    }

    #[test]
    fn unknown_entries_are_not_found() {
        let (service, _subscription) = setup();
        let missing = stockledger_core::EntryId::new(9_999);
        assert!(matches!(
            service.correct(&CorrectEntry { entry: missing, quantity: 1, unit_cost: None, reason: "x".into() }),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_consumers_never_overdraw() {
        let (service, _subscription) = setup();
        let service = Arc::new(service);
        let key = product(7);
        receive(&service, key, 60, 100, 3);
        receive(&service, key, 40, 110, 1);

        let consumed = Arc::new(AtomicI64::new(0));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let service = service.clone();
                let consumed = consumed.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        let req = ConsumeRequest::new(
                            key,
                            1,
                            ConsumptionCause::Sale(SaleId::new(worker + 1)),
                            Utc::now(),
                        );
                        match service.consume(&req) {
                            Ok(_) => {
                                consumed.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(LedgerError::InsufficientStock { .. }) => {}
                            Err(other) => panic!("unexpected error: {other:?}"),
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(consumed.load(Ordering::SeqCst), 100);
        assert_eq!(service.current_available(key).unwrap(), 0);
        let partition = service.store().snapshot(key).unwrap();
        for lot in partition.entries().iter().filter(|e| e.is_root()) {
            assert_eq!(partition.availability(lot.id).unwrap(), 0);
            assert_eq!(lot.status, EntryStatus::Exhausted);
        }
    }

    #[test]
    fn multi_partition_transactions_do_not_deadlock() {
        let (service, _subscription) = setup();
        let service = Arc::new(service);
        let flour = supply(1);
        let bread = product(2);
        receive(&service, flour, 10_000, 1, 1);
        receive(&service, bread, 10_000, 5, 1);

        let bakers: Vec<_> = (0..4)
            .map(|n| {
                let service = service.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        let run = ProductionRun {
                            production: ProductionId::new(n * 100 + i + 1),
                            store: StoreId::new(1),
                            produced: 2,
                            ingredients: vec![Ingredient { subject: flour.subject, per_unit: 5 }],
                            output: Some(ProductId::new(2)),
                            occurred_at: Utc::now(),
                        };
                        service.complete_production(&run).unwrap();
                    }
                })
            })
            .collect();
        let sellers: Vec<_> = (0..4)
            .map(|n| {
                let service = service.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        let sale = SaleFulfillment {
                            sale: SaleId::new(n * 100 + i + 1),
                            store: StoreId::new(1),
                            lines: vec![SaleLine { product: ProductId::new(2), quantity: 1 }],
                            occurred_at: Utc::now(),
                        };
                        service.fulfill_sale(&sale).unwrap();
                    }
                })
            })
            .collect();
        for handle in bakers.into_iter().chain(sellers) {
            handle.join().unwrap();
        }

        assert_eq!(service.current_available(flour).unwrap(), 10_000 - 40 * 10);
        assert_eq!(service.current_available(bread).unwrap(), 10_000 + 40 * 2 - 40);
    }
}
