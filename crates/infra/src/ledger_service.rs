//! Ledger execution pipeline (application-level orchestration).
//!
//! ```text
//! Request
//!   ↓
//! 1. Resolve the partitions the operation touches (locate by entry id if needed)
//!   ↓
//! 2. Transact: lock partitions, run the ledger operation on a working copy
//!   ↓
//! 3. Commit the diff atomically (or discard everything on any error)
//!   ↓
//! 4. Publish the emitted ledger events to the bus (only after commit)
//! ```
//!
//! Lock contention (`LedgerError::Concurrency`) re-runs steps 2-3 under the
//! configured `RetryPolicy`. Nothing else is retried.

use tracing::instrument;

use stockledger_core::{EntryId, LedgerError, LedgerResult, PartitionKey};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_ledger::{
    self as ledger, Adjustment, Allocation, AnnulEntry, Annulment, ConsumeRequest, CorrectEntry,
    Correction, EntryHistory, LedgerEvent, LotView, ProductionOutcome, ProductionRun, ReceiveLot,
    RecordAdjustment, SaleFulfillment, SaleOutcome, StockLevel, UnitOfWork,
};

use crate::retry::RetryPolicy;
use crate::store::EntryStore;

/// What the ledger publishes on its bus.
pub type LedgerEnvelope = EventEnvelope<LedgerEvent>;

/// Stock ledger service: every boundary operation and query, over any store and bus.
///
/// ## Generic Parameters
///
/// - `S`: entry store (`InMemoryEntryStore` in tests, `PostgresEntryStore` in production)
/// - `B`: event bus receiving `LedgerEnvelope`s after commit
#[derive(Debug)]
pub struct StockLedger<S, B> {
    store: S,
    bus: B,
    retry: RetryPolicy,
}

impl<S, B> StockLedger<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> StockLedger<S, B>
where
    S: EntryStore,
    B: EventBus<LedgerEnvelope>,
{
    fn execute<T>(
        &self,
        operation: &'static str,
        keys: &[PartitionKey],
        op: impl Fn(&mut UnitOfWork) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let committed = self
            .retry
            .retry(|_| self.store.transact(keys, &op))
            .inspect_err(|err| {
                tracing::warn!(operation, code = err.code(), error = %err, "ledger operation rejected");
            })?;

        self.publish(&committed.events);
        Ok(committed.value)
    }

    /// Best-effort: the ledger is already committed, so failures are only logged.
    fn publish(&self, events: &[LedgerEvent]) {
        for event in events {
            let envelope = EventEnvelope::wrap(event.partition(), event.clone());
            let event_type = envelope.event_type().to_string();
            if let Err(err) = self.bus.publish(envelope) {
                tracing::error!(event_type, error = ?err, "failed to publish ledger event");
            }
        }
    }

    fn owning_partition(&self, id: EntryId) -> LedgerResult<PartitionKey> {
        self.store
            .locate(id)?
            .ok_or_else(|| LedgerError::entry_not_found(id))
    }

    #[instrument(skip(self, cmd), fields(partition = %cmd.partition, quantity = cmd.quantity))]
    pub fn receive_lot(&self, cmd: &ReceiveLot) -> LedgerResult<EntryId> {
        self.execute("receive_lot", &cmd.partitions(), |uow| ledger::receive_lot(uow, cmd))
    }

    #[instrument(skip(self, cmd), fields(partition = %cmd.partition, quantity = cmd.quantity))]
    pub fn record_adjustment(&self, cmd: &RecordAdjustment) -> LedgerResult<Adjustment> {
        self.execute("record_adjustment", &cmd.partitions(), |uow| {
            ledger::record_adjustment(uow, cmd)
        })
    }

    /// FIFO consumption for any cause (sale, production, withdrawal).
    #[instrument(skip(self, req), fields(partition = %req.partition, quantity = req.quantity))]
    pub fn consume(&self, req: &ConsumeRequest) -> LedgerResult<Allocation> {
        self.execute("consume", &req.partitions(), |uow| ledger::consume(uow, req))
    }

    #[instrument(skip(self, cmd), fields(sale = %cmd.sale, lines = cmd.lines.len()))]
    pub fn fulfill_sale(&self, cmd: &SaleFulfillment) -> LedgerResult<SaleOutcome> {
        self.execute("fulfill_sale", &cmd.partitions(), |uow| ledger::fulfill_sale(uow, cmd))
    }

    #[instrument(skip(self, cmd), fields(production = %cmd.production, produced = cmd.produced))]
    pub fn complete_production(&self, cmd: &ProductionRun) -> LedgerResult<ProductionOutcome> {
        self.execute("complete_production", &cmd.partitions(), |uow| {
            ledger::complete_production(uow, cmd)
        })
    }

    #[instrument(skip(self, cmd), fields(entry = %cmd.entry))]
    pub fn correct(&self, cmd: &CorrectEntry) -> LedgerResult<Correction> {
        let key = self.owning_partition(cmd.entry)?;
        self.execute("correct", &[key], |uow| ledger::correct(uow, cmd))
    }

    #[instrument(skip(self, cmd), fields(entry = %cmd.entry))]
    pub fn annul(&self, cmd: &AnnulEntry) -> LedgerResult<Annulment> {
        let key = self.owning_partition(cmd.entry)?;
        self.execute("annul", &[key], |uow| ledger::annul(uow, cmd))
    }

    pub fn current_available(&self, key: PartitionKey) -> LedgerResult<i64> {
        ledger::current_available(&self.store.snapshot(key)?)
    }

    pub fn stock_level(&self, key: PartitionKey) -> LedgerResult<StockLevel> {
        StockLevel::of(&self.store.snapshot(key)?)
    }

    pub fn list_lots(&self, key: PartitionKey, include_inactive: bool) -> LedgerResult<Vec<LotView>> {
        ledger::list_lots(&self.store.snapshot(key)?, include_inactive)
    }

    pub fn entry_history(&self, id: EntryId) -> LedgerResult<EntryHistory> {
        let key = self.owning_partition(id)?;
        ledger::entry_history(&self.store.snapshot(key)?, id)
    }
}
