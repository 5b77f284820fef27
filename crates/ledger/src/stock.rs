//! Read-side queries over a committed partition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{EntryId, LedgerError, LedgerResult, PartitionKey};

use crate::entry::{EntryKind, EntryStatus, LedgerEntry};
use crate::partition::Partition;

/// Sum of availability over the active lots of a partition.
pub fn current_available(partition: &Partition) -> LedgerResult<i64> {
    partition.total_available()
}

/// FIFO valuation: remaining units of each active lot at that lot's cost.
/// Saturates at `i64::MAX`.
pub fn stock_value(partition: &Partition) -> LedgerResult<i64> {
    partition.active_roots().iter().try_fold(0i64, |total, lot| {
        let available = partition.availability(lot.id)?;
        Ok(total.saturating_add(available.saturating_mul(lot.unit_cost)))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub partition: PartitionKey,
    pub available: i64,
    pub value: i64,
    pub active_lots: usize,
}

impl StockLevel {
    pub fn of(partition: &Partition) -> LedgerResult<Self> {
        Ok(Self {
            partition: partition.key(),
            available: current_available(partition)?,
            value: stock_value(partition)?,
            active_lots: partition.active_roots().len(),
        })
    }
}

/// One lot as shown in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotView {
    pub id: EntryId,
    pub kind: EntryKind,
    pub occurred_at: DateTime<Utc>,
    pub unit_cost: i64,
    pub received: i64,
    pub consumed: i64,
    pub available: i64,
    pub status: EntryStatus,
}

/// Lots oldest-first; superseded and exhausted lots only when asked for.
pub fn list_lots(partition: &Partition, include_inactive: bool) -> LedgerResult<Vec<LotView>> {
    partition
        .entries()
        .into_iter()
        .filter(|e| e.is_root() && (include_inactive || e.is_active()))
        .map(|lot| {
            let available = partition.availability(lot.id)?;
            Ok(LotView {
                id: lot.id,
                kind: lot.kind,
                occurred_at: lot.occurred_at,
                unit_cost: lot.unit_cost,
                received: lot.quantity,
                consumed: lot.quantity - available,
                available,
                status: lot.status,
            })
        })
        .collect()
}

/// An entry with everything that hangs off it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHistory {
    pub entry: LedgerEntry,
    /// Draw-downs of this entry when it is a lot, in any status.
    pub children: Vec<LedgerEntry>,
    /// Earlier versions this entry replaced, newest first.
    pub replaces: Vec<LedgerEntry>,
    /// Later versions that replaced this entry, oldest first.
    pub replaced_by: Vec<LedgerEntry>,
    /// Remaining quantity when the entry is a lot.
    pub available: Option<i64>,
}

pub fn entry_history(partition: &Partition, id: EntryId) -> LedgerResult<EntryHistory> {
    let entry = partition
        .get(id)
        .cloned()
        .ok_or_else(|| LedgerError::entry_not_found(id))?;

    let mut children: Vec<LedgerEntry> = partition.children_of(id).cloned().collect();
    children.sort_by_key(|c| c.fifo_key());

    let mut replaces = Vec::new();
    let mut cursor = entry.supersedes;
    while let Some(prev) = cursor.and_then(|p| partition.get(p)) {
        replaces.push(prev.clone());
        cursor = prev.supersedes;
    }

    let mut replaced_by = Vec::new();
    let mut current = id;
    while let Some(next) = partition
        .entries()
        .into_iter()
        .find(|e| e.supersedes == Some(current))
    {
        replaced_by.push(next.clone());
        current = next.id;
    }

    let available = if entry.is_root() {
        Some(partition.availability(id)?)
    } else {
        None
    };

    Ok(EntryHistory {
        entry,
        children,
        replaces,
        replaced_by,
        available,
    })
}
