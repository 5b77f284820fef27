use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::time::{Duration, Instant};

use chrono::Utc;

use stockledger_core::{EntryId, LedgerError, LedgerResult, PartitionKey};
use stockledger_ledger::{IdSource, Partition, UnitOfWork};

use super::r#trait::{Committed, EntryStore, StoreError, lock_order};

const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(50);
const LOCK_POLL: Duration = Duration::from_micros(200);

type Slot = Arc<Mutex<Partition>>;

/// Ids drawn from the store-wide counter; a rolled-back transaction leaves a gap.
struct CounterIds(Arc<AtomicU64>);

impl IdSource for CounterIds {
    fn next_id(&mut self) -> LedgerResult<EntryId> {
        Ok(EntryId::new(self.0.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

/// In-memory entry store.
///
/// Intended for tests/dev. One mutex per partition; a transaction waits at most
/// `lock_wait` for each of its partitions before giving up.
#[derive(Debug)]
pub struct InMemoryEntryStore {
    partitions: RwLock<HashMap<PartitionKey, Slot>>,
    index: RwLock<HashMap<EntryId, PartitionKey>>,
    last_id: Arc<AtomicU64>,
    lock_wait: Duration,
}

impl Default for InMemoryEntryStore {
    fn default() -> Self {
        Self::with_lock_wait(DEFAULT_LOCK_WAIT)
    }
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            last_id: Arc::new(AtomicU64::new(0)),
            lock_wait,
        }
    }

    fn slot(&self, key: PartitionKey) -> Result<Slot, StoreError> {
        {
            let partitions = self
                .partitions
                .read()
                .map_err(|_| StoreError::Poisoned("partition map".to_string()))?;
            if let Some(slot) = partitions.get(&key) {
                return Ok(slot.clone());
            }
        }
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| StoreError::Poisoned("partition map".to_string()))?;
        Ok(partitions
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Partition::new(key))))
            .clone())
    }

    fn acquire<'a>(
        &self,
        key: PartitionKey,
        slot: &'a Slot,
    ) -> Result<MutexGuard<'a, Partition>, StoreError> {
        let deadline = Instant::now() + self.lock_wait;
        loop {
            match slot.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(partition = %key, wait_ms = self.lock_wait.as_millis() as u64, "partition lock wait exceeded");
                        return Err(StoreError::LockTimeout(format!(
                            "partition {key} is busy"
                        )));
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(TryLockError::Poisoned(poisoned)) => {
                    // Partitions are only written after `f` succeeds, so a panic
                    // inside a transaction leaves the committed state intact.
                    tracing::warn!(partition = %key, "recovering partition lock after a panicked transaction");
                    slot.clear_poison();
                    return Ok(poisoned.into_inner());
                }
            }
        }
    }
}

impl EntryStore for InMemoryEntryStore {
    fn transact<T, F>(&self, keys: &[PartitionKey], f: F) -> LedgerResult<Committed<T>>
    where
        F: Fn(&mut UnitOfWork) -> LedgerResult<T>,
    {
        let ordered = lock_order(keys)?;
        let slots = ordered
            .iter()
            .map(|k| self.slot(*k))
            .collect::<Result<Vec<_>, _>>()?;

        let mut guards = Vec::with_capacity(slots.len());
        for (key, slot) in ordered.iter().zip(&slots) {
            guards.push(self.acquire(*key, slot)?);
        }

        let mut uow = UnitOfWork::new(
            guards.iter().map(|g| (**g).clone()),
            Box::new(CounterIds(self.last_id.clone())),
            Utc::now(),
        );
        let value = f(&mut uow)?;
        let finished = uow.finish();

        {
            let mut index = self
                .index
                .write()
                .map_err(|_| StoreError::Poisoned("entry index".to_string()))?;
            for diff in &finished.diffs {
                for entry in &diff.inserted {
                    index.insert(entry.id, diff.key);
                }
                for id in &diff.erased {
                    index.remove(id);
                }
            }
        }
        for partition in finished.partitions {
            let position = ordered
                .binary_search(&partition.key())
                .map_err(|_| LedgerError::storage(format!("unexpected partition {}", partition.key())))?;
            *guards[position] = partition;
        }

        tracing::debug!(partitions = ordered.len(), changed = finished.diffs.len(), "transaction committed");
        Ok(Committed {
            value,
            events: finished.events,
            diffs: finished.diffs,
        })
    }

    fn snapshot(&self, key: PartitionKey) -> LedgerResult<Partition> {
        let key = key.validate()?;
        let slot = {
            let partitions = self
                .partitions
                .read()
                .map_err(|_| StoreError::Poisoned("partition map".to_string()))?;
            partitions.get(&key).cloned()
        };
        let Some(slot) = slot else {
            return Ok(Partition::new(key));
        };
        let guard = self.acquire(key, &slot)?;
        Ok(guard.clone())
    }

    fn locate(&self, id: EntryId) -> LedgerResult<Option<PartitionKey>> {
        let index = self
            .index
            .read()
            .map_err(|_| StoreError::Poisoned("entry index".to_string()))?;
        Ok(index.get(&id).copied())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use stockledger_core::{ProductId, StoreId, Subject};
    use stockledger_ledger::{EntryKind, NewEntry};

    fn key(product: i64) -> PartitionKey {
        PartitionKey::new(Subject::Product(ProductId::new(product)), StoreId::new(1))
    }

    #[test]
    fn committed_entries_are_visible_and_indexed() {
        let store = InMemoryEntryStore::new();
        let committed = store
            .transact(&[key(1)], |uow| {
                uow.append(NewEntry::root(key(1), EntryKind::ProcurementLot, 5, 10, Utc::now()))
            })
            .unwrap();

        let id = committed.value;
        assert_eq!(store.locate(id).unwrap(), Some(key(1)));
        assert_eq!(store.snapshot(key(1)).unwrap().len(), 1);
        assert!(store.snapshot(key(2)).unwrap().is_empty());
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let store = InMemoryEntryStore::new();
        let result: LedgerResult<Committed<()>> = store.transact(&[key(1)], |uow| {
            uow.append(NewEntry::root(key(1), EntryKind::ProcurementLot, 5, 10, Utc::now()))?;
            Err(LedgerError::validation("abort"))
        });
        assert!(result.is_err());
        assert!(store.snapshot(key(1)).unwrap().is_empty());
    }

    #[test]
    fn busy_partition_times_out_as_concurrency() {
        let store = Arc::new(InMemoryEntryStore::with_lock_wait(Duration::from_millis(5)));
        let slot = store.slot(key(1)).unwrap();
        let _held = slot.lock().unwrap();

        let result = store.transact(&[key(1)], |_| Ok(()));
        assert!(matches!(result, Err(LedgerError::Concurrency(_))));
    }

    #[test]
    fn panicking_transaction_does_not_wedge_the_partition() {
        let store = Arc::new(InMemoryEntryStore::new());
        store
            .transact(&[key(1)], |uow| {
                uow.append(NewEntry::root(key(1), EntryKind::ProcurementLot, 5, 10, Utc::now()))
            })
            .unwrap();

        let crashing = store.clone();
        let outcome = std::thread::spawn(move || {
            crashing.transact(&[key(1)], |uow| -> LedgerResult<()> {
                uow.append(NewEntry::root(key(1), EntryKind::ProcurementLot, 7, 10, Utc::now()))?;
                panic!("operation bug");
            })
        })
        .join();
        assert!(outcome.is_err());

        assert_eq!(store.snapshot(key(1)).unwrap().len(), 1);
        store
            .transact(&[key(1)], |uow| {
                uow.append(NewEntry::root(key(1), EntryKind::ProcurementLot, 2, 10, Utc::now()))
            })
            .unwrap();
        assert_eq!(store.snapshot(key(1)).unwrap().len(), 2);
    }

    #[test]
    fn ids_keep_increasing_across_transactions() {
        let store = InMemoryEntryStore::new();
        let first = store
            .transact(&[key(1)], |uow| {
                uow.append(NewEntry::root(key(1), EntryKind::ProcurementLot, 1, 1, Utc::now()))
            })
            .unwrap()
            .value;
        let second = store
            .transact(&[key(2)], |uow| {
                uow.append(NewEntry::root(key(2), EntryKind::ProcurementLot, 1, 1, Utc::now()))
            })
            .unwrap()
            .value;
        assert!(second > first);
    }
}
