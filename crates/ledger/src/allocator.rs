//! FIFO allocation: cover a demand from the oldest active lots first.

use serde::{Deserialize, Serialize};

use stockledger_core::{EntryId, LedgerError, LedgerResult};

use crate::partition::Partition;

/// One lot's share of a demand, before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub lot: EntryId,
    pub quantity: i64,
    pub unit_cost: i64,
}

/// Walk the active lots oldest-first and split `demand` across them.
///
/// Read-only: the caller writes one draw-down per returned `Draw`. When the
/// lots cannot cover the demand the whole plan is rejected and the error
/// carries the exact shortfall.
pub fn plan(partition: &Partition, demand: i64) -> LedgerResult<Vec<Draw>> {
    if demand <= 0 {
        return Err(LedgerError::validation(format!(
            "quantity to consume must be positive (got {demand})"
        )));
    }

    let mut remaining = demand;
    let mut draws = Vec::new();
    for lot in partition.active_roots() {
        if remaining == 0 {
            break;
        }
        let available = partition.availability(lot.id)?;
        let take = remaining.min(available);
        if take > 0 {
            draws.push(Draw {
                lot: lot.id,
                quantity: take,
                unit_cost: lot.unit_cost,
            });
            remaining -= take;
        }
    }

    if remaining > 0 {
        let key = partition.key();
        return Err(LedgerError::InsufficientStock {
            subject: key.subject,
            store: key.store,
            requested: demand,
            available: demand - remaining,
            shortfall: remaining,
        });
    }
    Ok(draws)
}

/// Would `demand` be coverable right now? Same walk as `plan`, no output.
pub fn ensure_coverage(partition: &Partition, demand: i64) -> LedgerResult<()> {
    plan(partition, demand).map(|_| ())
}
