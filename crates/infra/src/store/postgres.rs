//! Postgres-backed entry store implementation.
//!
//! Every transaction runs inside one database transaction:
//!
//! 1. `SET LOCAL lock_timeout` bounds how long we wait on a busy partition
//! 2. `pg_advisory_xact_lock` per partition, in sorted key order
//! 3. Load the locked partitions and reserve a block of entry ids sized from them
//! 4. Run the ledger operation against the working copy (no IO); when the block
//!    runs dry, reserve a block twice the size and run it again under the same locks
//! 5. Write the diff (inserts, status/annotation updates, deletions) and commit
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database | `55P03` | `LockTimeout` | Partition locked longer than `lock_wait` |
//! | Database | `40001` / `40P01` | `LockTimeout` | Serialization failure or deadlock victim |
//! | Database | `23505` / `23503` / `23514` | `Database` | Constraint violation (a ledger bug, not retryable) |
//! | Database (other) | Any other | `Database` | Other database errors |
//! | PoolClosed | N/A | `Database` | Connection pool was closed |
//! | Other | N/A | `Database` | Network errors, connection failures, etc. |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use stockledger_core::{
    EntryId, LedgerError, LedgerKind, LedgerResult, PartitionKey, StoreId, Subject,
};
use stockledger_ledger::{
    Annotation, Correlation, EntryKind, EntryStatus, LedgerEntry, Partition, PartitionDiff,
    ReservedIds, UnitOfWork,
};

use super::r#trait::{Committed, EntryStore, StoreError, lock_order};

const SCHEMA: &str = include_str!("../../migrations/0001_ledger_entries.sql");

/// Postgres-backed entry store.
///
/// `Send + Sync` and cheap to clone; all access goes through the SQLx pool.
#[derive(Debug, Clone)]
pub struct PostgresEntryStore {
    pool: Arc<PgPool>,
    lock_wait: Duration,
    /// Upper bound on the first reservation of a transaction.
    id_block: u32,
}

impl PostgresEntryStore {
    pub fn new(pool: PgPool, lock_wait: Duration, id_block: u32) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_wait,
            id_block: id_block.max(1),
        }
    }

    /// Create the sequence, table and indexes when missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, f), fields(partitions = keys.len(), committed = tracing::field::Empty), err)]
    pub async fn transact_async<T, F>(
        &self,
        keys: Vec<PartitionKey>,
        f: F,
    ) -> LedgerResult<Committed<T>>
    where
        F: Fn(&mut UnitOfWork) -> LedgerResult<T>,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET does not take bind parameters; the value is an integer we own.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_wait.as_millis().max(1)))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        let mut partitions = Vec::with_capacity(keys.len());
        for key in &keys {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(advisory_key(*key))
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    let err = map_sqlx_error("lock_partition", e);
                    if matches!(err, StoreError::LockTimeout(_)) {
                        tracing::warn!(partition = %key, "partition lock wait exceeded");
                    }
                    err
                })?;
            partitions.push(load_partition(&mut *tx, *key).await?);
        }

        let now = Utc::now();
        let mut block = initial_id_block(&partitions, self.id_block);
        let (value, finished) = loop {
            let ids = reserve_ids(&mut tx, block).await?;
            let mut uow = UnitOfWork::new(
                partitions.iter().cloned(),
                Box::new(ReservedIds::new(ids)),
                now,
            );
            // A rejected operation drops `tx`, which rolls back.
            match f(&mut uow) {
                Ok(value) => break (value, uow.finish()),
                Err(_) if uow.ids_exhausted() => {
                    block = block.checked_mul(2).ok_or_else(|| {
                        LedgerError::storage("transaction needs more entry ids than can be reserved")
                    })?;
                    tracing::debug!(block, "id block exhausted; retrying with a larger one");
                }
                Err(err) => return Err(err),
            }
        };

        for diff in &finished.diffs {
            write_diff(&mut tx, diff).await?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed", finished.diffs.len());
        Ok(Committed {
            value,
            events: finished.events,
            diffs: finished.diffs,
        })
    }

    #[instrument(skip(self), fields(partition = %key), err)]
    pub async fn load_snapshot(&self, key: PartitionKey) -> Result<Partition, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        load_partition(&mut *conn, key).await
    }

    #[instrument(skip(self), fields(entry = %id), err)]
    pub async fn find_partition(&self, id: EntryId) -> Result<Option<PartitionKey>, StoreError> {
        let row = sqlx::query("SELECT ledger, subject_id, store_id FROM ledger_entries WHERE id = $1")
            .bind(entry_id_param(id)?)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("locate", e))?;
        row.map(|r| partition_of(&r)).transpose()
    }

    fn runtime(&self) -> Result<tokio::runtime::Handle, StoreError> {
        tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Runtime(
                "PostgresEntryStore requires a tokio runtime; call it from spawn_blocking or a runtime thread".to_string(),
            )
        })
    }
}

// The EntryStore trait is synchronous; Postgres access is async. As with the rest
// of the workspace, bridge with `Handle::block_on` from a blocking-capable thread.
impl EntryStore for PostgresEntryStore {
    fn transact<T, F>(&self, keys: &[PartitionKey], f: F) -> LedgerResult<Committed<T>>
    where
        F: Fn(&mut UnitOfWork) -> LedgerResult<T>,
    {
        let ordered = lock_order(keys)?;
        let handle = self.runtime()?;
        handle.block_on(self.transact_async(ordered, f))
    }

    fn snapshot(&self, key: PartitionKey) -> LedgerResult<Partition> {
        let key = key.validate()?;
        let handle = self.runtime()?;
        Ok(handle.block_on(self.load_snapshot(key))?)
    }

    fn locate(&self, id: EntryId) -> LedgerResult<Option<PartitionKey>> {
        let handle = self.runtime()?;
        Ok(handle.block_on(self.find_partition(id))?)
    }
}

/// Stable 64-bit advisory lock key for a partition (FNV-1a).
fn advisory_key(key: PartitionKey) -> i64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    let bytes = key
        .subject
        .ledger()
        .as_str()
        .bytes()
        .chain(key.subject.raw_id().to_le_bytes())
        .chain(key.store.get().to_le_bytes());
    for byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash as i64
}

fn entry_id_param(id: EntryId) -> Result<i64, StoreError> {
    i64::try_from(id.get()).map_err(|_| StoreError::Corrupt(format!("entry id {id} out of range")))
}

/// First reservation for a transaction over `partitions`.
///
/// A draw-down per active lot, plus a replacement or output lot per partition
/// and one spare, capped at `cap`.
fn initial_id_block(partitions: &[Partition], cap: u32) -> u32 {
    let lots: usize = partitions.iter().map(|p| p.active_roots().len()).sum();
    let wanted = lots.saturating_add(2 * partitions.len()).saturating_add(1);
    u32::try_from(wanted).unwrap_or(u32::MAX).min(cap).max(1)
}

async fn reserve_ids(
    tx: &mut Transaction<'_, Postgres>,
    count: u32,
) -> Result<Vec<EntryId>, StoreError> {
    let rows = sqlx::query("SELECT nextval('ledger_entry_id_seq') AS id FROM generate_series(1, $1)")
        .bind(i64::from(count))
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("reserve_ids", e))?;
    rows.iter()
        .map(|row| {
            let raw: i64 = row
                .try_get("id")
                .map_err(|e| StoreError::Corrupt(format!("failed to read reserved id: {e}")))?;
            u64::try_from(raw)
                .map(EntryId::new)
                .map_err(|_| StoreError::Corrupt(format!("negative sequence value {raw}")))
        })
        .collect()
}

async fn load_partition<'c, E>(executor: E, key: PartitionKey) -> Result<Partition, StoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT
            id,
            ledger,
            subject_id,
            store_id,
            kind,
            quantity,
            unit_cost,
            parent_id,
            supersedes_id,
            correlation,
            occurred_at,
            created_at,
            status,
            annotations
        FROM ledger_entries
        WHERE ledger = $1 AND subject_id = $2 AND store_id = $3
        ORDER BY occurred_at ASC, created_at ASC, id ASC
        "#,
    )
    .bind(key.subject.ledger().as_str())
    .bind(key.subject.raw_id())
    .bind(key.store.get())
    .fetch_all(executor)
    .await
    .map_err(|e| map_sqlx_error("load_partition", e))?;

    let entries = rows
        .iter()
        .map(|row| EntryRow::from_row(row).and_then(LedgerEntry::try_from))
        .collect::<Result<Vec<_>, _>>()?;
    Partition::from_entries(key, entries).map_err(|e| StoreError::Corrupt(e.to_string()))
}

async fn write_diff(
    tx: &mut Transaction<'_, Postgres>,
    diff: &PartitionDiff,
) -> Result<(), StoreError> {
    // Parents are always written before the draw-downs that reference them.
    let mut inserted: Vec<&LedgerEntry> = diff.inserted.iter().collect();
    inserted.sort_by_key(|e| e.id);

    for entry in inserted {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id,
                ledger,
                subject_id,
                store_id,
                kind,
                quantity,
                unit_cost,
                parent_id,
                supersedes_id,
                correlation,
                occurred_at,
                created_at,
                status,
                annotations
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(entry_id_param(entry.id)?)
        .bind(entry.subject().ledger().as_str())
        .bind(entry.subject().raw_id())
        .bind(entry.store().get())
        .bind(entry.kind.as_str())
        .bind(entry.quantity)
        .bind(entry.unit_cost)
        .bind(entry.parent.map(entry_id_param).transpose()?)
        .bind(entry.supersedes.map(entry_id_param).transpose()?)
        .bind(to_json(&entry.correlation)?)
        .bind(entry.occurred_at)
        .bind(entry.created_at)
        .bind(entry.status.as_str())
        .bind(to_json(&entry.annotations)?)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entry", e))?;
    }

    for entry in &diff.updated {
        sqlx::query("UPDATE ledger_entries SET status = $2, annotations = $3 WHERE id = $1")
            .bind(entry_id_param(entry.id)?)
            .bind(entry.status.as_str())
            .bind(to_json(&entry.annotations)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_entry", e))?;
    }

    for id in &diff.erased {
        sqlx::query("DELETE FROM ledger_entries WHERE id = $1")
            .bind(entry_id_param(*id)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("delete_entry", e))?;
    }

    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(format!("serialization failed: {e}")))
}

fn partition_of(row: &PgRow) -> Result<PartitionKey, StoreError> {
    let ledger: String = read(row, "ledger")?;
    let ledger: LedgerKind = ledger
        .parse()
        .map_err(|e: LedgerError| StoreError::Corrupt(e.to_string()))?;
    Ok(PartitionKey::new(
        Subject::from_parts(ledger, read(row, "subject_id")?),
        StoreId::new(read(row, "store_id")?),
    ))
}

fn read<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("failed to read {column}: {e}")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // lock_not_available, serialization_failure, deadlock_detected
                Some("55P03") | Some("40001") | Some("40P01") => StoreError::LockTimeout(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types
#[derive(Debug)]
struct EntryRow {
    id: i64,
    key: PartitionKey,
    kind: String,
    quantity: i64,
    unit_cost: i64,
    parent_id: Option<i64>,
    supersedes_id: Option<i64>,
    correlation: Option<serde_json::Value>,
    occurred_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    status: String,
    annotations: serde_json::Value,
}

impl EntryRow {
    fn from_row(row: &PgRow) -> Result<Self, StoreError> {
        Ok(EntryRow {
            id: read(row, "id")?,
            key: partition_of(row)?,
            kind: read(row, "kind")?,
            quantity: read(row, "quantity")?,
            unit_cost: read(row, "unit_cost")?,
            parent_id: read(row, "parent_id")?,
            supersedes_id: read(row, "supersedes_id")?,
            correlation: read(row, "correlation")?,
            occurred_at: read(row, "occurred_at")?,
            created_at: read(row, "created_at")?,
            status: read(row, "status")?,
            annotations: read(row, "annotations")?,
        })
    }
}

fn stored_id(raw: i64) -> Result<EntryId, StoreError> {
    u64::try_from(raw)
        .map(EntryId::new)
        .map_err(|_| StoreError::Corrupt(format!("negative entry id {raw}")))
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let corrupt = |e: LedgerError| StoreError::Corrupt(e.to_string());
        let correlation: Option<Correlation> = row
            .correlation
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("bad correlation on entry {}: {e}", row.id)))?;
        let annotations: Vec<Annotation> = serde_json::from_value(row.annotations)
            .map_err(|e| StoreError::Corrupt(format!("bad annotations on entry {}: {e}", row.id)))?;

        Ok(LedgerEntry {
            id: stored_id(row.id)?,
            partition: row.key,
            kind: EntryKind::parse(&row.kind).map_err(corrupt)?,
            quantity: row.quantity,
            unit_cost: row.unit_cost,
            parent: row.parent_id.map(stored_id).transpose()?,
            supersedes: row.supersedes_id.map(stored_id).transpose()?,
            correlation,
            occurred_at: row.occurred_at,
            created_at: row.created_at,
            status: EntryStatus::parse(&row.status).map_err(corrupt)?,
            annotations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{ProductId, SupplyId};

    #[test]
    fn advisory_keys_separate_ledgers_and_stores() {
        let product = PartitionKey::new(Subject::Product(ProductId::new(1)), StoreId::new(1));
        let supply = PartitionKey::new(Subject::Supply(SupplyId::new(1)), StoreId::new(1));
        let other_store = PartitionKey::new(Subject::Product(ProductId::new(1)), StoreId::new(2));

        assert_eq!(advisory_key(product), advisory_key(product));
        assert_ne!(advisory_key(product), advisory_key(supply));
        assert_ne!(advisory_key(product), advisory_key(other_store));
    }

    #[test]
    fn first_id_block_follows_the_locked_lots() {
        let key = PartitionKey::new(Subject::Product(ProductId::new(1)), StoreId::new(1));
        let now = Utc::now();
        let lot = |id: u64| LedgerEntry {
            id: EntryId::new(id),
            partition: key,
            kind: EntryKind::ProcurementLot,
            quantity: 1,
            unit_cost: 1,
            parent: None,
            supersedes: None,
            correlation: None,
            occurred_at: now,
            created_at: now,
            status: EntryStatus::Active,
            annotations: Vec::new(),
        };

        assert_eq!(initial_id_block(&[Partition::new(key)], 256), 3);
        let busy = Partition::from_entries(key, (1..=40).map(lot)).unwrap();
        assert_eq!(initial_id_block(std::slice::from_ref(&busy), 256), 43);
        assert_eq!(initial_id_block(&[busy], 16), 16);
    }

    #[test]
    fn schema_declares_the_entry_table_and_sequence() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS ledger_entries"));
        assert!(SCHEMA.contains("ledger_entry_id_seq"));
    }
}
