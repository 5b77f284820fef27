//! Lot lifecycle: exhaustion bookkeeping after a lot's consumed total changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{EntryId, LedgerError, LedgerResult};

use crate::entry::{Annotation, AnnotationCode, EntryStatus};
use crate::partition::Partition;

/// A lot that just reached zero availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exhaustion {
    pub lot: EntryId,
    /// Draw-downs that were settled together with the lot.
    pub settled: Vec<EntryId>,
}

/// Recompute a lot's availability and close it exactly at zero.
///
/// Closing marks the lot `Exhausted` and every in-force draw-down of it
/// `Settled`. Inactive lots are left untouched: nothing here ever reactivates.
pub fn reconcile(
    partition: &mut Partition,
    lot: EntryId,
    now: DateTime<Utc>,
) -> LedgerResult<Option<Exhaustion>> {
    let root = partition
        .get(lot)
        .ok_or_else(|| LedgerError::not_found(format!("lot {lot}")))?;
    if !root.is_root() {
        return Err(LedgerError::validation(format!("entry {lot} is not a lot")));
    }
    if !root.is_active() {
        return Ok(None);
    }

    let available = partition.availability(lot)?;
    if available < 0 {
        return Err(LedgerError::storage(format!(
            "lot {lot} in {} is overdrawn by {}",
            partition.key(),
            -available
        )));
    }
    if available > 0 {
        return Ok(None);
    }

    let settled: Vec<EntryId> = partition
        .children_of(lot)
        .filter(|c| c.is_active())
        .map(|c| c.id)
        .collect();

    partition.set_status(
        lot,
        EntryStatus::Exhausted,
        Annotation::new(now, AnnotationCode::LotExhausted, "availability reached zero"),
    )?;
    for child in &settled {
        partition.set_status(
            *child,
            EntryStatus::Settled,
            Annotation::new(now, AnnotationCode::Settled, format!("lot {lot} exhausted")),
        )?;
    }

    tracing::debug!(lot = %lot, partition = %partition.key(), settled = settled.len(), "lot exhausted");
    Ok(Some(Exhaustion { lot, settled }))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::entry::{EntryKind, LedgerEntry};
    use crate::test_support::{lot, product_key};

    fn draw(root: &LedgerEntry, id: u64, qty: i64) -> LedgerEntry {
        LedgerEntry {
            id: EntryId::new(id),
            quantity: -qty,
            parent: Some(root.id),
            kind: EntryKind::ManualAdjustment,
            ..root.clone()
        }
    }

    #[test]
    fn lot_closes_exactly_at_zero() {
        let key = product_key(1, 1);
        let root = lot(key, 1, 5, 100, Utc::now());
        let mut partition =
            Partition::from_entries(key, [root.clone(), draw(&root, 2, 3), draw(&root, 3, 2)]).unwrap();

        let closed = reconcile(&mut partition, EntryId::new(1), Utc::now()).unwrap().unwrap();
        assert_eq!(closed.settled, vec![EntryId::new(2), EntryId::new(3)]);
        assert_eq!(partition.get(EntryId::new(1)).unwrap().status, EntryStatus::Exhausted);
        assert_eq!(partition.get(EntryId::new(2)).unwrap().status, EntryStatus::Settled);
        assert_eq!(partition.availability(EntryId::new(1)).unwrap(), 0);
    }

    #[test]
    fn partially_consumed_lot_stays_open() {
        let key = product_key(1, 1);
        let root = lot(key, 1, 5, 100, Utc::now());
        let mut partition = Partition::from_entries(key, [root.clone(), draw(&root, 2, 4)]).unwrap();

        assert!(reconcile(&mut partition, EntryId::new(1), Utc::now()).unwrap().is_none());
        assert!(partition.get(EntryId::new(1)).unwrap().is_active());
    }

    #[test]
    fn exhausted_lot_is_never_reopened() {
        let key = product_key(1, 1);
        let root = LedgerEntry {
            status: EntryStatus::Exhausted,
            ..lot(key, 1, 5, 100, Utc::now())
        };
        let mut partition = Partition::from_entries(key, [root]).unwrap();

        // Availability reads 5 (no draw-downs), yet the lot stays closed.
        assert!(reconcile(&mut partition, EntryId::new(1), Utc::now()).unwrap().is_none());
        assert_eq!(partition.get(EntryId::new(1)).unwrap().status, EntryStatus::Exhausted);
    }

    #[test]
    fn overdrawn_lot_is_reported() {
        let key = product_key(1, 1);
        let root = lot(key, 1, 5, 100, Utc::now());
        let mut partition = Partition::from_entries(key, [root.clone(), draw(&root, 2, 6)]).unwrap();
        assert!(matches!(
            reconcile(&mut partition, EntryId::new(1), Utc::now()),
            Err(LedgerError::Storage(_))
        ));
    }
}
