use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{EntryId, PartitionKey};
use stockledger_events::Event;

use crate::entry::{Correlation, EntryKind};

/// Event: a lot (root entry) was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotReceived {
    pub partition: PartitionKey,
    pub lot: EntryId,
    pub kind: EntryKind,
    pub quantity: i64,
    pub unit_cost: i64,
    pub correlation: Option<Correlation>,
    pub occurred_at: DateTime<Utc>,
}

/// One lot's share of a consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedDraw {
    pub entry: EntryId,
    pub lot: EntryId,
    pub quantity: i64,
    pub unit_cost: i64,
}

/// Event: the allocator drew stock oldest-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockConsumed {
    pub partition: PartitionKey,
    pub kind: EntryKind,
    pub correlation: Option<Correlation>,
    pub requested: i64,
    pub draws: Vec<ConsumedDraw>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an operator adjustment was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRecorded {
    pub partition: PartitionKey,
    pub entries: Vec<EntryId>,
    /// Signed net movement.
    pub quantity: i64,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an entry was tombstoned and replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCorrected {
    pub partition: PartitionKey,
    pub superseded: EntryId,
    pub replacement: EntryId,
    pub old_quantity: i64,
    pub new_quantity: i64,
    pub old_unit_cost: i64,
    pub new_unit_cost: i64,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: an erroneous entry was physically removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryAnnulled {
    pub partition: PartitionKey,
    pub entry: EntryId,
    pub kind: EntryKind,
    pub quantity: i64,
    pub parent: Option<EntryId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a lot reached zero availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotExhausted {
    pub partition: PartitionKey,
    pub lot: EntryId,
    pub settled: Vec<EntryId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    LotReceived(LotReceived),
    StockConsumed(StockConsumed),
    AdjustmentRecorded(AdjustmentRecorded),
    EntryCorrected(EntryCorrected),
    EntryAnnulled(EntryAnnulled),
    LotExhausted(LotExhausted),
}

impl LedgerEvent {
    pub fn partition(&self) -> PartitionKey {
        match self {
            LedgerEvent::LotReceived(e) => e.partition,
            LedgerEvent::StockConsumed(e) => e.partition,
            LedgerEvent::AdjustmentRecorded(e) => e.partition,
            LedgerEvent::EntryCorrected(e) => e.partition,
            LedgerEvent::EntryAnnulled(e) => e.partition,
            LedgerEvent::LotExhausted(e) => e.partition,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::LotReceived(_) => "ledger.lot.received",
            LedgerEvent::StockConsumed(_) => "ledger.stock.consumed",
            LedgerEvent::AdjustmentRecorded(_) => "ledger.adjustment.recorded",
            LedgerEvent::EntryCorrected(_) => "ledger.entry.corrected",
            LedgerEvent::EntryAnnulled(_) => "ledger.entry.annulled",
            LedgerEvent::LotExhausted(_) => "ledger.lot.exhausted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::LotReceived(e) => e.occurred_at,
            LedgerEvent::StockConsumed(e) => e.occurred_at,
            LedgerEvent::AdjustmentRecorded(e) => e.occurred_at,
            LedgerEvent::EntryCorrected(e) => e.occurred_at,
            LedgerEvent::EntryAnnulled(e) => e.occurred_at,
            LedgerEvent::LotExhausted(e) => e.occurred_at,
        }
    }
}
