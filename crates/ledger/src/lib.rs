//! Stock ledger domain (FIFO lots, draw-downs, corrections).
//!
//! This crate contains the ledger's business rules as deterministic domain
//! logic (no IO, no HTTP, no storage). A store hands it locked partitions
//! through a `UnitOfWork` and persists whatever comes back.

pub mod allocator;
pub mod correction;
pub mod entry;
pub mod events;
pub mod lifecycle;
pub mod operations;
pub mod partition;
pub mod stock;
pub mod unit_of_work;

pub use allocator::{Draw, ensure_coverage, plan};
pub use correction::{
    AnnulEntry, Annulment, CorrectEntry, Correction, annul, annulment_eligibility, correct,
    correction_eligibility,
};
pub use entry::{
    Annotation, AnnotationCode, Correlation, EntryKind, EntryStatus, LedgerEntry, NewEntry,
};
pub use events::{
    AdjustmentRecorded, ConsumedDraw, EntryAnnulled, EntryCorrected, LedgerEvent, LotExhausted,
    LotReceived, StockConsumed,
};
pub use lifecycle::Exhaustion;
pub use operations::{
    Adjustment, Allocation, ConsumeRequest, ConsumptionCause, Ingredient, LotSource,
    ProductionOutcome, ProductionRun, ReceiveLot, RecordAdjustment, SaleFulfillment, SaleLine,
    SaleOutcome, complete_production, consume, fulfill_sale, receive_lot, record_adjustment,
};
pub use partition::Partition;
pub use stock::{EntryHistory, LotView, StockLevel, current_available, entry_history, list_lots, stock_value};
pub use unit_of_work::{Finished, IdSource, PartitionDiff, ReservedIds, SequentialIds, UnitOfWork};
