//! Arena of entries for one (subject, store) key.
//!
//! Entries reference each other only by id through a single optional parent
//! field. Depth is capped at two: a parent is always a root of the same
//! partition.

use std::collections::BTreeMap;

use stockledger_core::{ConflictReason, EntryId, LedgerError, LedgerResult, PartitionKey};

use crate::entry::{Annotation, EntryStatus, LedgerEntry, NewEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    key: PartitionKey,
    entries: BTreeMap<EntryId, LedgerEntry>,
}

impl Partition {
    pub fn new(key: PartitionKey) -> Self {
        Self {
            key,
            entries: BTreeMap::new(),
        }
    }

    /// Rebuild a partition from stored rows.
    pub fn from_entries(
        key: PartitionKey,
        entries: impl IntoIterator<Item = LedgerEntry>,
    ) -> LedgerResult<Self> {
        let mut partition = Self::new(key);
        for entry in entries {
            if entry.partition != key {
                return Err(LedgerError::storage(format!(
                    "entry {} belongs to {}, not {key}",
                    entry.id, entry.partition
                )));
            }
            partition.entries.insert(entry.id, entry);
        }
        Ok(partition)
    }

    pub fn key(&self) -> PartitionKey {
        self.key
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EntryId) -> Option<&LedgerEntry> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Every entry, oldest first.
    pub fn entries(&self) -> Vec<&LedgerEntry> {
        let mut all: Vec<&LedgerEntry> = self.entries.values().collect();
        all.sort_by_key(|e| e.fifo_key());
        all
    }

    /// Entries whose parent is `id`, in any status.
    pub fn children_of(&self, id: EntryId) -> impl Iterator<Item = &LedgerEntry> + '_ {
        self.entries.values().filter(move |e| e.parent == Some(id))
    }

    pub fn has_dependents(&self, id: EntryId) -> bool {
        self.children_of(id).next().is_some()
    }

    /// Active roots in allocation order (oldest first).
    pub fn active_roots(&self) -> Vec<&LedgerEntry> {
        let mut roots: Vec<&LedgerEntry> = self
            .entries
            .values()
            .filter(|e| e.is_root() && e.is_active())
            .collect();
        roots.sort_by_key(|e| e.fifo_key());
        roots
    }

    /// Remaining quantity of a lot: its amount minus every in-force draw-down.
    ///
    /// This is the only availability formula in the crate; the allocator, the
    /// lifecycle manager, corrections and stock queries all go through it.
    pub fn availability(&self, root: EntryId) -> LedgerResult<i64> {
        let lot = self
            .entries
            .get(&root)
            .ok_or_else(|| LedgerError::not_found(format!("lot {root}")))?;
        if !lot.is_root() {
            return Err(LedgerError::validation(format!("entry {root} is not a lot")));
        }
        let consumed = self
            .children_of(root)
            .filter(|c| c.is_in_force())
            .try_fold(0i64, |acc, c| acc.checked_add(c.quantity.checked_abs()?))
            .ok_or_else(|| LedgerError::storage(format!("consumed total of lot {root} overflows")))?;
        Ok(lot.quantity - consumed)
    }

    /// Sum of availability over the active lots.
    pub fn total_available(&self) -> LedgerResult<i64> {
        self.active_roots().iter().try_fold(0i64, |acc, lot| {
            acc.checked_add(self.availability(lot.id)?)
                .ok_or_else(|| LedgerError::storage(format!("available total of {} overflows", self.key)))
        })
    }

    /// Check an entry against the partition before it is written.
    pub fn validate_new(&self, new: &NewEntry) -> LedgerResult<()> {
        if new.partition != self.key {
            return Err(LedgerError::validation(format!(
                "entry for {} cannot be written to {}",
                new.partition, self.key
            )));
        }
        new.validate_shape()?;

        if let Some(old) = new.supersedes {
            let superseded = self
                .entries
                .get(&old)
                .ok_or_else(|| LedgerError::entry_not_found(old))?;
            if superseded.status != EntryStatus::Superseded {
                return Err(LedgerError::validation(format!(
                    "entry {old} must be tombstoned before it is replaced"
                )));
            }
            if superseded.parent != new.parent {
                return Err(LedgerError::validation(
                    "a replacement keeps the parent of the entry it replaces",
                ));
            }
        }

        let Some(parent_id) = new.parent else {
            if self.total_available()?.checked_add(new.quantity).is_none() {
                return Err(LedgerError::validation(format!(
                    "receiving {} would overflow the stock of {}",
                    new.quantity, self.key
                )));
            }
            return Ok(());
        };

        let parent = self
            .entries
            .get(&parent_id)
            .ok_or_else(|| LedgerError::not_found(format!("lot {parent_id} in {}", self.key)))?;
        if !parent.is_root() {
            return Err(LedgerError::validation(format!(
                "entry {parent_id} is itself a draw-down; only lots can be drawn from"
            )));
        }
        if !parent.is_active() {
            return Err(LedgerError::conflict(ConflictReason::Inactive));
        }
        if let Some(cost) = new.unit_cost {
            if cost != parent.unit_cost {
                return Err(LedgerError::validation(format!(
                    "a draw-down carries its lot's unit cost ({})",
                    parent.unit_cost
                )));
            }
        }

        let available = self.availability(parent_id)?;
        let requested = new.quantity.abs();
        if requested > available {
            return Err(LedgerError::InsufficientStock {
                subject: self.key.subject,
                store: self.key.store,
                requested,
                available,
                shortfall: requested - available,
            });
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, entry: LedgerEntry) {
        self.entries.insert(entry.id, entry);
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> LedgerResult<&mut LedgerEntry> {
        self.entries
            .get_mut(&id)
            .ok_or_else(|| LedgerError::entry_not_found(id))
    }

    pub(crate) fn set_status(
        &mut self,
        id: EntryId,
        status: EntryStatus,
        annotation: Annotation,
    ) -> LedgerResult<()> {
        let entry = self.entry_mut(id)?;
        entry.status = status;
        entry.annotations.push(annotation);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: EntryId) -> LedgerResult<LedgerEntry> {
        self.entries
            .remove(&id)
            .ok_or_else(|| LedgerError::entry_not_found(id))
    }
}
