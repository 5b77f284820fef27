//! Strongly-typed identifiers used across the ledger.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Identifier of a ledger entry.
///
/// Assigned by the entry store from a monotonically increasing counter, so a
/// larger id always means a later write.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for EntryId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .parse::<u64>()
            .map_err(|e| LedgerError::validation(format!("EntryId: {e}")))?;
        Ok(Self(raw))
    }
}

/// Identifier of a store (the stock scope).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(i64);

/// Identifier of a finished-goods product.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

/// Identifier of a raw supply.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplyId(i64);

/// Identifier of an external sale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(i64);

/// Identifier of an external production completion.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductionId(i64);

/// Identifier of an external procurement (purchase).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(i64);

macro_rules! impl_serial_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }

            /// Reject non-positive identifiers (database serials start at 1).
            pub fn validate(self) -> Result<Self, LedgerError> {
                if self.0 <= 0 {
                    return Err(LedgerError::validation(format!(
                        "{} must be positive (got {})",
                        $name, self.0
                    )));
                }
                Ok(self)
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = LedgerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .parse::<i64>()
                    .map_err(|e| LedgerError::validation(format!("{}: {}", $name, e)))?;
                Ok(Self(raw))
            }
        }
    };
}

impl_serial_newtype!(StoreId, "StoreId");
impl_serial_newtype!(ProductId, "ProductId");
impl_serial_newtype!(SupplyId, "SupplyId");
impl_serial_newtype!(SaleId, "SaleId");
impl_serial_newtype!(ProductionId, "ProductionId");
impl_serial_newtype!(PurchaseId, "PurchaseId");

/// Which of the two parallel ledgers an entry belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Product,
    Supply,
}

impl LedgerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerKind::Product => "product",
            LedgerKind::Supply => "supply",
        }
    }
}

impl core::fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product" => Ok(LedgerKind::Product),
            "supply" => Ok(LedgerKind::Supply),
            other => Err(LedgerError::validation(format!(
                "ledger must be one of: product, supply (got '{other}')"
            ))),
        }
    }
}

/// The stocked thing: a product (finished goods) or a supply (raw material).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Subject {
    Product(ProductId),
    Supply(SupplyId),
}

impl Subject {
    pub fn from_parts(ledger: LedgerKind, raw: i64) -> Self {
        match ledger {
            LedgerKind::Product => Subject::Product(ProductId::new(raw)),
            LedgerKind::Supply => Subject::Supply(SupplyId::new(raw)),
        }
    }

    pub fn ledger(self) -> LedgerKind {
        match self {
            Subject::Product(_) => LedgerKind::Product,
            Subject::Supply(_) => LedgerKind::Supply,
        }
    }

    pub fn raw_id(self) -> i64 {
        match self {
            Subject::Product(id) => id.get(),
            Subject::Supply(id) => id.get(),
        }
    }

    pub fn validate(self) -> Result<Self, LedgerError> {
        match self {
            Subject::Product(id) => id.validate().map(Subject::Product),
            Subject::Supply(id) => id.validate().map(Subject::Supply),
        }
    }
}

impl core::fmt::Display for Subject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.ledger(), self.raw_id())
    }
}

/// A (subject, store) pair: the unit of FIFO ordering, stock queries and locking.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub subject: Subject,
    pub store: StoreId,
}

impl PartitionKey {
    pub fn new(subject: Subject, store: StoreId) -> Self {
        Self { subject, store }
    }

    /// Validate both halves of the key.
    pub fn validate(self) -> Result<Self, LedgerError> {
        self.subject.validate()?;
        self.store.validate()?;
        Ok(self)
    }
}

impl core::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@store:{}", self.subject, self.store)
    }
}
