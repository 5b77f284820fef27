use std::sync::Arc;

use thiserror::Error;

use stockledger_core::{EntryId, LedgerError, LedgerResult, PartitionKey};
use stockledger_ledger::{LedgerEvent, Partition, PartitionDiff, UnitOfWork};

/// Entry store operation error.
///
/// These are infrastructure failures (locking, IO, decoding) as opposed to the
/// ledger's own rule violations, which travel as `LedgerError` untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("partition lock not acquired: {0}")]
    LockTimeout(String),

    #[error("lock poisoned: {0}")]
    Poisoned(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    #[error("async runtime unavailable: {0}")]
    Runtime(String),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::LockTimeout(msg) => LedgerError::Concurrency(msg),
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

/// Result of a committed transaction.
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    /// Ledger events produced by the transaction, in emission order.
    pub events: Vec<LedgerEvent>,
    pub diffs: Vec<PartitionDiff>,
}

/// Durable home of ledger entries, partitioned by (subject, store).
///
/// ## Transaction semantics
///
/// `transact()`:
/// - Takes exclusive ownership of every listed partition, in sorted key order
/// - Gives up after the configured lock wait with `LedgerError::Concurrency`
/// - Runs `f` against a working copy of the locked partitions; a store may run
///   it more than once (for instance with a larger id reservation), only the
///   last run's writes are kept
/// - On `Ok`, commits every insert, status change and erasure atomically
/// - On `Err`, discards all of it; nothing `f` wrote becomes visible
///
/// Readers (`snapshot`) only ever observe committed state.
pub trait EntryStore: Send + Sync {
    fn transact<T, F>(&self, keys: &[PartitionKey], f: F) -> LedgerResult<Committed<T>>
    where
        F: Fn(&mut UnitOfWork) -> LedgerResult<T>;

    /// Committed entries of one partition (empty when nothing was ever written).
    fn snapshot(&self, key: PartitionKey) -> LedgerResult<Partition>;

    /// Which partition owns an entry id.
    fn locate(&self, id: EntryId) -> LedgerResult<Option<PartitionKey>>;
}

impl<S> EntryStore for Arc<S>
where
    S: EntryStore + ?Sized,
{
    fn transact<T, F>(&self, keys: &[PartitionKey], f: F) -> LedgerResult<Committed<T>>
    where
        F: Fn(&mut UnitOfWork) -> LedgerResult<T>,
    {
        (**self).transact(keys, f)
    }

    fn snapshot(&self, key: PartitionKey) -> LedgerResult<Partition> {
        (**self).snapshot(key)
    }

    fn locate(&self, id: EntryId) -> LedgerResult<Option<PartitionKey>> {
        (**self).locate(id)
    }
}

/// Validate, sort and dedup a lock set so every caller locks in the same order.
pub(crate) fn lock_order(keys: &[PartitionKey]) -> LedgerResult<Vec<PartitionKey>> {
    if keys.is_empty() {
        return Err(LedgerError::validation("a transaction needs at least one partition"));
    }
    let mut ordered = keys
        .iter()
        .map(|k| k.validate())
        .collect::<LedgerResult<Vec<_>>>()?;
    ordered.sort();
    ordered.dedup();
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{ProductId, StoreId, Subject, SupplyId};

    #[test]
    fn lock_order_is_sorted_and_unique() {
        let a = PartitionKey::new(Subject::Supply(SupplyId::new(1)), StoreId::new(1));
        let b = PartitionKey::new(Subject::Product(ProductId::new(2)), StoreId::new(1));
        let ordered = lock_order(&[a, b, a]).unwrap();
        assert_eq!(ordered.len(), 2);
        assert!(ordered[0] < ordered[1]);
        assert_eq!(lock_order(&[b, a]).unwrap(), ordered);
    }

    #[test]
    fn invalid_keys_are_rejected_before_locking() {
        let bad = PartitionKey::new(Subject::Product(ProductId::new(0)), StoreId::new(1));
        assert!(matches!(lock_order(&[bad]), Err(LedgerError::Validation(_))));
        assert!(matches!(lock_order(&[]), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn only_lock_timeouts_become_retryable() {
        assert!(LedgerError::from(StoreError::LockTimeout("busy".into())).is_retryable());
        assert!(matches!(
            LedgerError::from(StoreError::Database("down".into())),
            LedgerError::Storage(_)
        ));
    }
}
