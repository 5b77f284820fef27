//! Ledger error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{EntryId, StoreId, Subject};

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which correction/annulment precondition an entry failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictReason {
    /// The entry was written by a sale.
    SaleLinked,
    /// The entry was written by a production run.
    ProductionLinked,
    /// Only manual adjustments may be annulled.
    NotManualAdjustment,
    /// Other entries point at this one as their parent.
    HasDependents,
    /// The entry is exhausted, settled or superseded.
    Inactive,
    /// The requested correction changes nothing.
    NoOp,
}

impl ConflictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictReason::SaleLinked => "sale-linked",
            ConflictReason::ProductionLinked => "production-linked",
            ConflictReason::NotManualAdjustment => "not-manual-adjustment",
            ConflictReason::HasDependents => "has-dependents",
            ConflictReason::Inactive => "inactive",
            ConflictReason::NoOp => "no-op",
        }
    }
}

impl core::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger-level error.
///
/// Every operation boundary returns one of these; none are panics. Only
/// `Concurrency` is worth retrying, everything else is a definitive answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed input (bad id, zero quantity, empty reason, wrong sign).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown entry, lot or subject.
    #[error("not found: {0}")]
    NotFound(String),

    /// The allocator could not cover the demand.
    #[error(
        "insufficient stock for {subject} in store {store}: requested {requested}, available {available}, short by {shortfall}"
    )]
    InsufficientStock {
        subject: Subject,
        store: StoreId,
        requested: i64,
        available: i64,
        shortfall: i64,
    },

    /// A correction/annulment precondition was violated.
    #[error("conflict: {0}")]
    Conflict(ConflictReason),

    /// Lock contention on a partition; safe to retry.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// The backing store failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn entry_not_found(id: EntryId) -> Self {
        Self::NotFound(format!("entry {id}"))
    }

    pub fn conflict(reason: ConflictReason) -> Self {
        Self::Conflict(reason)
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Concurrency(_))
    }

    /// Stable machine-readable code (used by the HTTP surface and logs).
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation_error",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Concurrency(_) => "concurrency_error",
            LedgerError::Storage(_) => "storage_error",
        }
    }
}
