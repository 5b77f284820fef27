//! Ledger service wiring (store + bus) and the async bridge to it.
//!
//! `StockLedger` is synchronous and may block on partition locks (and, for
//! Postgres, on `Handle::block_on`), so every call runs on the blocking pool.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use stockledger_core::{EntryId, LedgerError, LedgerResult, PartitionKey};
use stockledger_events::{EventBus, InMemoryEventBus};
use stockledger_infra::{
    EntryStore, InMemoryEntryStore, LedgerConfig, LedgerEnvelope, PostgresEntryStore, StockLedger,
};
use stockledger_ledger::{
    Adjustment, Allocation, AnnulEntry, Annulment, ConsumeRequest, CorrectEntry, Correction,
    EntryHistory, LotView, ProductionOutcome, ProductionRun, ReceiveLot, RecordAdjustment,
    SaleFulfillment, SaleOutcome, StockLevel,
};

type Bus = Arc<InMemoryEventBus<LedgerEnvelope>>;

/// Object-safe view of `StockLedger`, so handlers do not care which store backs it.
pub trait LedgerApi: Send + Sync {
    fn receive_lot(&self, cmd: &ReceiveLot) -> LedgerResult<EntryId>;
    fn record_adjustment(&self, cmd: &RecordAdjustment) -> LedgerResult<Adjustment>;
    fn consume(&self, req: &ConsumeRequest) -> LedgerResult<Allocation>;
    fn fulfill_sale(&self, cmd: &SaleFulfillment) -> LedgerResult<SaleOutcome>;
    fn complete_production(&self, cmd: &ProductionRun) -> LedgerResult<ProductionOutcome>;
    fn correct(&self, cmd: &CorrectEntry) -> LedgerResult<Correction>;
    fn annul(&self, cmd: &AnnulEntry) -> LedgerResult<Annulment>;
    fn stock_level(&self, key: PartitionKey) -> LedgerResult<StockLevel>;
    fn list_lots(&self, key: PartitionKey, include_inactive: bool) -> LedgerResult<Vec<LotView>>;
    fn entry_history(&self, id: EntryId) -> LedgerResult<EntryHistory>;
}

impl<S, B> LedgerApi for StockLedger<S, B>
where
    S: EntryStore,
    B: EventBus<LedgerEnvelope>,
{
    fn receive_lot(&self, cmd: &ReceiveLot) -> LedgerResult<EntryId> {
        StockLedger::receive_lot(self, cmd)
    }

    fn record_adjustment(&self, cmd: &RecordAdjustment) -> LedgerResult<Adjustment> {
        StockLedger::record_adjustment(self, cmd)
    }

    fn consume(&self, req: &ConsumeRequest) -> LedgerResult<Allocation> {
        StockLedger::consume(self, req)
    }

    fn fulfill_sale(&self, cmd: &SaleFulfillment) -> LedgerResult<SaleOutcome> {
        StockLedger::fulfill_sale(self, cmd)
    }

    fn complete_production(&self, cmd: &ProductionRun) -> LedgerResult<ProductionOutcome> {
        StockLedger::complete_production(self, cmd)
    }

    fn correct(&self, cmd: &CorrectEntry) -> LedgerResult<Correction> {
        StockLedger::correct(self, cmd)
    }

    fn annul(&self, cmd: &AnnulEntry) -> LedgerResult<Annulment> {
        StockLedger::annul(self, cmd)
    }

    fn stock_level(&self, key: PartitionKey) -> LedgerResult<StockLevel> {
        StockLedger::stock_level(self, key)
    }

    fn list_lots(&self, key: PartitionKey, include_inactive: bool) -> LedgerResult<Vec<LotView>> {
        StockLedger::list_lots(self, key, include_inactive)
    }

    fn entry_history(&self, id: EntryId) -> LedgerResult<EntryHistory> {
        StockLedger::entry_history(self, id)
    }
}

pub type InMemoryLedger = StockLedger<Arc<InMemoryEntryStore>, Bus>;
pub type PostgresLedger = StockLedger<Arc<PostgresEntryStore>, Bus>;

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        ledger: Arc<InMemoryLedger>,
        bus: Bus,
    },
    Postgres {
        ledger: Arc<PostgresLedger>,
        bus: Bus,
    },
}

impl AppServices {
    pub fn backend(&self) -> &'static str {
        match self {
            AppServices::InMemory { .. } => "in_memory",
            AppServices::Postgres { .. } => "postgres",
        }
    }

    /// Bus carrying every committed ledger event (subscribe for downstream consumers).
    pub fn bus(&self) -> &Bus {
        match self {
            AppServices::InMemory { bus, .. } | AppServices::Postgres { bus, .. } => bus,
        }
    }

    fn ledger(&self) -> Arc<dyn LedgerApi> {
        match self {
            AppServices::InMemory { ledger, .. } => ledger.clone(),
            AppServices::Postgres { ledger, .. } => ledger.clone(),
        }
    }

    /// Run a ledger call on the blocking pool.
    pub async fn run<T, F>(&self, op: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn LedgerApi) -> LedgerResult<T> + Send + 'static,
    {
        let ledger = self.ledger();
        tokio::task::spawn_blocking(move || op(ledger.as_ref()))
            .await
            .map_err(|e| LedgerError::storage(format!("ledger task failed: {e}")))?
    }
}

/// In-memory wiring (dev/test).
pub fn build_in_memory_services(config: &LedgerConfig) -> AppServices {
    let store = Arc::new(InMemoryEntryStore::with_lock_wait(config.lock_wait));
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let ledger = StockLedger::new(store, bus.clone()).with_retry(config.retry.clone());

    AppServices::InMemory {
        ledger: Arc::new(ledger),
        bus,
    }
}

/// Postgres wiring: connect, create the schema when missing, build the ledger.
pub async fn build_postgres_services(
    config: &LedgerConfig,
    database_url: &str,
) -> anyhow::Result<AppServices> {
    let pool = PgPoolOptions::new().connect(database_url).await?;

    let store = PostgresEntryStore::new(pool, config.lock_wait, config.id_block);
    store.ensure_schema().await?;

    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let ledger = StockLedger::new(Arc::new(store), bus.clone()).with_retry(config.retry.clone());

    Ok(AppServices::Postgres {
        ledger: Arc::new(ledger),
        bus,
    })
}

/// Postgres when `DATABASE_URL` is configured, in-memory otherwise.
pub async fn build_services(config: &LedgerConfig) -> anyhow::Result<AppServices> {
    match config.database_url.as_deref() {
        Some(url) => {
            tracing::info!("using postgres entry store");
            build_postgres_services(config, url).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory entry store");
            Ok(build_in_memory_services(config))
        }
    }
}
