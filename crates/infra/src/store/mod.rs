//! Entry store boundary.
//!
//! A partition-locking, transactional home for ledger entries. The ledger crate
//! decides what to write; implementations here decide how it becomes durable.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEntryStore;
pub use postgres::PostgresEntryStore;
pub use r#trait::{Committed, EntryStore, StoreError};
