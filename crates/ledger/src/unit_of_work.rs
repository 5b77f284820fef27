//! Transaction working copy.
//!
//! A store hands the locked partitions to a `UnitOfWork`, the operation mutates
//! the copies, and the store either persists the resulting diff (`finish`) or
//! drops the whole thing. Nothing here performs IO.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use stockledger_core::{EntryId, LedgerError, LedgerResult, PartitionKey};

use crate::entry::{Annotation, EntryStatus, LedgerEntry, NewEntry};
use crate::events::{LedgerEvent, LotExhausted};
use crate::lifecycle::{self, Exhaustion};
use crate::partition::Partition;

/// Source of fresh entry ids for a transaction.
pub trait IdSource: Send {
    fn next_id(&mut self) -> LedgerResult<EntryId>;

    /// True once a request could not be served; the store may retry with more ids.
    fn exhausted(&self) -> bool {
        false
    }
}

/// Counter-backed ids, starting after `last`.
#[derive(Debug, Clone, Default)]
pub struct SequentialIds {
    last: u64,
}

impl SequentialIds {
    pub fn starting_after(last: u64) -> Self {
        Self { last }
    }
}

impl IdSource for SequentialIds {
    fn next_id(&mut self) -> LedgerResult<EntryId> {
        self.last += 1;
        Ok(EntryId::new(self.last))
    }
}

/// A pre-reserved block of ids (e.g. taken from a database sequence).
#[derive(Debug, Clone)]
pub struct ReservedIds {
    ids: std::collections::VecDeque<EntryId>,
    reserved: usize,
    dry: bool,
}

impl ReservedIds {
    pub fn new(ids: impl IntoIterator<Item = EntryId>) -> Self {
        let ids: std::collections::VecDeque<EntryId> = ids.into_iter().collect();
        Self {
            reserved: ids.len(),
            ids,
            dry: false,
        }
    }
}

impl IdSource for ReservedIds {
    fn next_id(&mut self) -> LedgerResult<EntryId> {
        match self.ids.pop_front() {
            Some(id) => Ok(id),
            None => {
                self.dry = true;
                Err(LedgerError::storage(format!(
                    "reserved id block of {} exhausted",
                    self.reserved
                )))
            }
        }
    }

    fn exhausted(&self) -> bool {
        self.dry
    }
}

#[derive(Debug, Default, Clone)]
struct Touched {
    inserted: BTreeSet<EntryId>,
    updated: BTreeSet<EntryId>,
    erased: BTreeSet<EntryId>,
}

/// What a committed transaction changed in one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDiff {
    pub key: PartitionKey,
    pub inserted: Vec<LedgerEntry>,
    /// Pre-existing entries whose status or annotations changed.
    pub updated: Vec<LedgerEntry>,
    pub erased: Vec<EntryId>,
}

impl PartitionDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.erased.is_empty()
    }
}

/// Everything a store needs to commit a finished unit of work.
#[derive(Debug, Clone)]
pub struct Finished {
    pub partitions: Vec<Partition>,
    pub diffs: Vec<PartitionDiff>,
    pub events: Vec<LedgerEvent>,
}

pub struct UnitOfWork {
    partitions: BTreeMap<PartitionKey, Partition>,
    ids: Box<dyn IdSource>,
    now: DateTime<Utc>,
    touched: BTreeMap<PartitionKey, Touched>,
    events: Vec<LedgerEvent>,
}

impl core::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("partitions", &self.partitions.keys().collect::<Vec<_>>())
            .field("now", &self.now)
            .field("events", &self.events.len())
            .finish()
    }
}

impl UnitOfWork {
    pub fn new(
        partitions: impl IntoIterator<Item = Partition>,
        ids: Box<dyn IdSource>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            partitions: partitions.into_iter().map(|p| (p.key(), p)).collect(),
            ids,
            now,
            touched: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Did the id source run dry during this transaction?
    pub fn ids_exhausted(&self) -> bool {
        self.ids.exhausted()
    }

    /// Transaction timestamp; every `created_at` and annotation uses it.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn keys(&self) -> impl Iterator<Item = PartitionKey> + '_ {
        self.partitions.keys().copied()
    }

    pub fn partition(&self, key: PartitionKey) -> LedgerResult<&Partition> {
        self.partitions.get(&key).ok_or_else(|| not_locked(key))
    }

    fn partition_mut(&mut self, key: PartitionKey) -> LedgerResult<&mut Partition> {
        self.partitions.get_mut(&key).ok_or_else(|| not_locked(key))
    }

    /// Partition holding `id`, among the locked ones.
    pub fn locate(&self, id: EntryId) -> Option<PartitionKey> {
        self.partitions
            .values()
            .find(|p| p.contains(id))
            .map(|p| p.key())
    }

    pub fn entry(&self, id: EntryId) -> LedgerResult<&LedgerEntry> {
        self.partitions
            .values()
            .find_map(|p| p.get(id))
            .ok_or_else(|| LedgerError::entry_not_found(id))
    }

    /// Validate and write a new entry, then run lot bookkeeping on its lot.
    pub fn append(&mut self, new: NewEntry) -> LedgerResult<EntryId> {
        let key = new.partition;
        let now = self.now;
        self.partition(key)?.validate_new(&new)?;

        let unit_cost = match new.parent {
            Some(lot) => {
                self.partition(key)?
                    .get(lot)
                    .ok_or_else(|| LedgerError::not_found(format!("lot {lot} in {key}")))?
                    .unit_cost
            }
            None => new
                .unit_cost
                .ok_or_else(|| LedgerError::validation("a lot requires a unit cost"))?,
        };
        let id = self.ids.next_id()?;
        let entry = LedgerEntry {
            id,
            partition: key,
            kind: new.kind,
            quantity: new.quantity,
            unit_cost,
            parent: new.parent,
            supersedes: new.supersedes,
            correlation: new.correlation,
            occurred_at: new.occurred_at,
            created_at: now,
            status: EntryStatus::Active,
            annotations: new.annotations,
        };

        self.partition_mut(key)?.insert(entry);
        self.touched.entry(key).or_default().inserted.insert(id);

        if let Some(lot) = new.parent {
            self.reconcile(key, lot)?;
        }
        Ok(id)
    }

    /// Flip an entry to `Superseded`; quantity and cost stay as written.
    pub fn tombstone(&mut self, id: EntryId, annotation: Annotation) -> LedgerResult<()> {
        let key = self.locate(id).ok_or_else(|| LedgerError::entry_not_found(id))?;
        self.partition_mut(key)?
            .set_status(id, EntryStatus::Superseded, annotation)?;
        self.mark_updated(key, id);
        Ok(())
    }

    /// Add an audit line without changing anything else.
    pub fn annotate(&mut self, id: EntryId, annotation: Annotation) -> LedgerResult<()> {
        let key = self.locate(id).ok_or_else(|| LedgerError::entry_not_found(id))?;
        self.partition_mut(key)?.entry_mut(id)?.annotations.push(annotation);
        self.mark_updated(key, id);
        Ok(())
    }

    /// Physically remove an entry.
    pub fn erase(&mut self, id: EntryId) -> LedgerResult<LedgerEntry> {
        let key = self.locate(id).ok_or_else(|| LedgerError::entry_not_found(id))?;
        let removed = self.partition_mut(key)?.remove(id)?;
        let touched = self.touched.entry(key).or_default();
        touched.updated.remove(&id);
        if !touched.inserted.remove(&id) {
            touched.erased.insert(id);
        }
        Ok(removed)
    }

    /// Run the lifecycle manager on a lot and record what it closed.
    pub fn reconcile(&mut self, key: PartitionKey, lot: EntryId) -> LedgerResult<Option<Exhaustion>> {
        let now = self.now;
        let closed = lifecycle::reconcile(self.partition_mut(key)?, lot, now)?;
        if let Some(exhaustion) = &closed {
            self.mark_updated(key, exhaustion.lot);
            for child in &exhaustion.settled {
                self.mark_updated(key, *child);
            }
            self.events.push(LedgerEvent::LotExhausted(LotExhausted {
                partition: key,
                lot: exhaustion.lot,
                settled: exhaustion.settled.clone(),
                occurred_at: now,
            }));
        }
        Ok(closed)
    }

    pub fn emit(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    fn mark_updated(&mut self, key: PartitionKey, id: EntryId) {
        let touched = self.touched.entry(key).or_default();
        if !touched.inserted.contains(&id) {
            touched.updated.insert(id);
        }
    }

    /// Close the transaction and compute what changed.
    pub fn finish(self) -> Finished {
        let mut diffs = Vec::with_capacity(self.touched.len());
        for (key, touched) in &self.touched {
            let Some(partition) = self.partitions.get(key) else {
                continue;
            };
            let pick = |ids: &BTreeSet<EntryId>| -> Vec<LedgerEntry> {
                ids.iter().filter_map(|id| partition.get(*id).cloned()).collect()
            };
            let diff = PartitionDiff {
                key: *key,
                inserted: pick(&touched.inserted),
                updated: pick(&touched.updated),
                erased: touched.erased.iter().copied().collect(),
            };
            if !diff.is_empty() {
                diffs.push(diff);
            }
        }

        Finished {
            partitions: self.partitions.into_values().collect(),
            diffs,
            events: self.events,
        }
    }
}

fn not_locked(key: PartitionKey) -> LedgerError {
    LedgerError::storage(format!("partition {key} is not part of this transaction"))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::entry::{AnnotationCode, EntryKind};
    use crate::test_support::product_key;

    #[test]
    fn diff_separates_inserts_updates_and_erasures() {
        let key = product_key(1, 1);
        let now = Utc::now();
        let mut seed = UnitOfWork::new([Partition::new(key)], Box::new(SequentialIds::default()), now);
        let lot = seed
            .append(NewEntry::root(key, EntryKind::ProcurementLot, 5, 10, now))
            .unwrap();
        let stale = seed
            .append(NewEntry::root(key, EntryKind::ManualAdjustment, 1, 10, now))
            .unwrap();
        let finished = seed.finish();
        assert_eq!(finished.diffs[0].inserted.len(), 2);

        let mut uow = UnitOfWork::new(
            finished.partitions,
            Box::new(SequentialIds::starting_after(2)),
            now,
        );
        let draw = uow
            .append(NewEntry::draw(key, EntryKind::ManualAdjustment, lot, 5, now))
            .unwrap();
        uow.erase(stale).unwrap();
        let finished = uow.finish();

        let diff = &finished.diffs[0];
        assert_eq!(diff.inserted.iter().map(|e| e.id).collect::<Vec<_>>(), vec![draw]);
        // The lot was exhausted by the draw and shows up as updated.
        assert_eq!(diff.updated.iter().map(|e| e.id).collect::<Vec<_>>(), vec![lot]);
        assert_eq!(diff.erased, vec![stale]);
        assert!(matches!(finished.events[0], LedgerEvent::LotExhausted(_)));
    }

    #[test]
    fn erasing_an_entry_written_in_the_same_transaction_leaves_no_trace() {
        let key = product_key(1, 1);
        let now = Utc::now();
        let mut uow = UnitOfWork::new([Partition::new(key)], Box::new(SequentialIds::default()), now);
        let id = uow
            .append(NewEntry::root(key, EntryKind::ManualAdjustment, 3, 1, now))
            .unwrap();
        uow.annotate(id, Annotation::new(now, AnnotationCode::Adjustment, "typo"))
            .unwrap();
        uow.erase(id).unwrap();
        assert!(uow.finish().diffs.is_empty());
    }

    #[test]
    fn partitions_outside_the_transaction_are_refused() {
        let now = Utc::now();
        let mut uow = UnitOfWork::new(
            [Partition::new(product_key(1, 1))],
            Box::new(SequentialIds::default()),
            now,
        );
        let other = product_key(2, 1);
        assert!(matches!(
            uow.append(NewEntry::root(other, EntryKind::ProcurementLot, 1, 1, now)),
            Err(LedgerError::Storage(_))
        ));
    }

    #[test]
    fn costs_come_from_the_lot_and_are_never_defaulted() {
        let key = product_key(1, 1);
        let now = Utc::now();
        let mut uow = UnitOfWork::new([Partition::new(key)], Box::new(SequentialIds::default()), now);
        let lot = uow
            .append(NewEntry::root(key, EntryKind::ProcurementLot, 5, 37, now))
            .unwrap();
        let draw = uow
            .append(NewEntry::draw(key, EntryKind::ManualAdjustment, lot, 2, now))
            .unwrap();
        assert_eq!(uow.entry(draw).unwrap().unit_cost, 37);

        let mut costless = NewEntry::root(key, EntryKind::ProcurementLot, 5, 1, now);
        costless.unit_cost = None;
        assert!(matches!(uow.append(costless), Err(LedgerError::Validation(_))));
        assert!(matches!(
            uow.append(NewEntry::draw(key, EntryKind::ManualAdjustment, EntryId::new(99), 1, now)),
            Err(LedgerError::NotFound(_))
        ));
        assert_eq!(uow.partition(key).unwrap().len(), 2);
    }

    #[test]
    fn reserved_block_runs_dry() {
        let mut ids = ReservedIds::new([EntryId::new(40)]);
        assert_eq!(ids.next_id().unwrap(), EntryId::new(40));
        assert!(!ids.exhausted());
        assert!(matches!(ids.next_id(), Err(LedgerError::Storage(_))));
        assert!(ids.exhausted());
    }

    #[test]
    fn running_out_of_ids_is_reported_as_exhaustion_not_bad_input() {
        let key = product_key(1, 1);
        let now = Utc::now();
        let mut seed = UnitOfWork::new([Partition::new(key)], Box::new(SequentialIds::default()), now);
        for _ in 0..3 {
            seed.append(NewEntry::root(key, EntryKind::ProcurementLot, 1, 10, now))
                .unwrap();
        }
        let partitions = seed.finish().partitions;

        let mut uow = UnitOfWork::new(
            partitions,
            Box::new(ReservedIds::new([EntryId::new(10), EntryId::new(11)])),
            now,
        );
        let demand = crate::operations::ConsumeRequest::new(
            key,
            3,
            crate::operations::ConsumptionCause::withdrawal("count"),
            now,
        );
        let err = crate::operations::consume(&mut uow, &demand).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)), "got {err:?}");
        assert!(uow.ids_exhausted());
    }
}
