//! Infrastructure layer: entry stores, the ledger service, config.

pub mod config;
pub mod ledger_service;
pub mod retry;
pub mod store;

pub use config::{ConfigError, LedgerConfig};
pub use ledger_service::{LedgerEnvelope, StockLedger};
pub use retry::RetryPolicy;
pub use store::{Committed, EntryStore, InMemoryEntryStore, PostgresEntryStore, StoreError};

mod integration_tests;
