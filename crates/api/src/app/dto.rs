use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    EntryId, LedgerKind, LedgerResult, PartitionKey, ProductId, ProductionId, PurchaseId, SaleId,
    StoreId, Subject,
};
use stockledger_ledger::{
    ConsumeRequest, ConsumptionCause, Ingredient, LotSource, ProductionRun, ReceiveLot,
    RecordAdjustment, SaleFulfillment, SaleLine,
};

// -------------------------
// Request DTOs
// -------------------------

/// `(ledger, subject_id, store_id)` as it appears in bodies and paths.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PartitionRef {
    pub ledger: LedgerKind,
    pub subject_id: i64,
    pub store_id: i64,
}

impl PartitionRef {
    pub fn key(self) -> LedgerResult<PartitionKey> {
        PartitionKey::new(
            Subject::from_parts(self.ledger, self.subject_id),
            StoreId::new(self.store_id),
        )
        .validate()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotSourceKind {
    #[default]
    Procurement,
    Production,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveLotRequest {
    #[serde(flatten)]
    pub partition: PartitionRef,
    pub quantity: i64,
    pub unit_cost: i64,
    #[serde(default)]
    pub source: LotSourceKind,
    /// Purchase or production id, depending on `source`.
    pub reference: Option<i64>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl ReceiveLotRequest {
    pub fn into_command(self) -> LedgerResult<ReceiveLot> {
        let source = match self.source {
            LotSourceKind::Procurement => LotSource::Procurement(self.reference.map(PurchaseId::new)),
            LotSourceKind::Production => LotSource::Production(self.reference.map(ProductionId::new)),
        };
        Ok(ReceiveLot {
            partition: self.partition.key()?,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            source,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    #[serde(flatten)]
    pub partition: PartitionRef,
    /// Signed: positive adds stock, negative removes it.
    pub quantity: i64,
    pub unit_cost: Option<i64>,
    pub lot_id: Option<u64>,
    pub reason: String,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl AdjustmentRequest {
    pub fn into_command(self) -> LedgerResult<RecordAdjustment> {
        Ok(RecordAdjustment {
            partition: self.partition.key()?,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            lot: self.lot_id.map(EntryId::new),
            reason: self.reason,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    #[serde(flatten)]
    pub partition: PartitionRef,
    pub quantity: i64,
    pub reason: String,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl WithdrawalRequest {
    pub fn into_command(self) -> LedgerResult<ConsumeRequest> {
        Ok(ConsumeRequest::new(
            self.partition.key()?,
            self.quantity,
            ConsumptionCause::withdrawal(self.reason),
            self.occurred_at.unwrap_or_else(Utc::now),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct SaleLineRequest {
    pub product_id: i64,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct SaleRequest {
    pub sale_id: i64,
    pub store_id: i64,
    pub lines: Vec<SaleLineRequest>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl SaleRequest {
    pub fn into_command(self) -> SaleFulfillment {
        SaleFulfillment {
            sale: SaleId::new(self.sale_id),
            store: StoreId::new(self.store_id),
            lines: self
                .lines
                .into_iter()
                .map(|l| SaleLine {
                    product: ProductId::new(l.product_id),
                    quantity: l.quantity,
                })
                .collect(),
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IngredientRequest {
    pub ledger: LedgerKind,
    pub subject_id: i64,
    pub per_unit: i64,
}

#[derive(Debug, Deserialize)]
pub struct ProductionRequest {
    pub production_id: i64,
    pub store_id: i64,
    pub produced: i64,
    pub ingredients: Vec<IngredientRequest>,
    /// Product receiving the output lot; nothing is received when absent.
    pub output_product_id: Option<i64>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl ProductionRequest {
    pub fn into_command(self) -> ProductionRun {
        ProductionRun {
            production: ProductionId::new(self.production_id),
            store: StoreId::new(self.store_id),
            produced: self.produced,
            ingredients: self
                .ingredients
                .into_iter()
                .map(|i| Ingredient {
                    subject: Subject::from_parts(i.ledger, i.subject_id),
                    per_unit: i.per_unit,
                })
                .collect(),
            output: self.output_product_id.map(ProductId::new),
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub quantity: i64,
    pub unit_cost: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AnnulmentRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LotsQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct StockResponse {
    pub ledger: LedgerKind,
    pub subject_id: i64,
    pub store_id: StoreId,
    pub available: i64,
    pub value: i64,
    pub active_lots: usize,
}

impl From<stockledger_ledger::StockLevel> for StockResponse {
    fn from(level: stockledger_ledger::StockLevel) -> Self {
        Self {
            ledger: level.partition.subject.ledger(),
            subject_id: level.partition.subject.raw_id(),
            store_id: level.partition.store,
            available: level.available,
            value: level.value,
            active_lots: level.active_lots,
        }
    }
}
