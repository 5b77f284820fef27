//! `stockledger-core`: shared building blocks for the stock ledger.
//!
//! Identifiers and the error taxonomy only; no storage or IO concerns.

pub mod error;
pub mod id;

pub use error::{ConflictReason, LedgerError, LedgerResult};
pub use id::{
    EntryId, LedgerKind, PartitionKey, ProductId, ProductionId, PurchaseId, SaleId, StoreId,
    Subject, SupplyId,
};
