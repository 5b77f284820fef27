use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    EntryId, LedgerError, LedgerResult, PartitionKey, ProductionId, PurchaseId, SaleId, StoreId,
    Subject,
};

/// What wrote an entry. Closed set; eligibility rules match on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Incoming stock from a purchase.
    ProcurementLot,
    /// Incoming stock from a completed production run.
    ProductionLot,
    /// Draw-down written by the allocator for a sale.
    SaleConsumption,
    /// Draw-down written by the allocator for a recipe ingredient.
    RecipeConsumption,
    /// Operator-entered movement: found stock (root) or shrinkage (child).
    ManualAdjustment,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::ProcurementLot => "procurement_lot",
            EntryKind::ProductionLot => "production_lot",
            EntryKind::SaleConsumption => "sale_consumption",
            EntryKind::RecipeConsumption => "recipe_consumption",
            EntryKind::ManualAdjustment => "manual_adjustment",
        }
    }

    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "procurement_lot" => Ok(EntryKind::ProcurementLot),
            "production_lot" => Ok(EntryKind::ProductionLot),
            "sale_consumption" => Ok(EntryKind::SaleConsumption),
            "recipe_consumption" => Ok(EntryKind::RecipeConsumption),
            "manual_adjustment" => Ok(EntryKind::ManualAdjustment),
            other => Err(LedgerError::validation(format!("unknown entry kind '{other}'"))),
        }
    }

    /// May this kind appear without a parent?
    pub fn may_be_root(self) -> bool {
        matches!(
            self,
            EntryKind::ProcurementLot | EntryKind::ProductionLot | EntryKind::ManualAdjustment
        )
    }

    /// May this kind draw from a lot?
    pub fn may_be_child(self) -> bool {
        matches!(
            self,
            EntryKind::SaleConsumption | EntryKind::RecipeConsumption | EntryKind::ManualAdjustment
        )
    }

    fn accepts(self, correlation: Option<&Correlation>) -> bool {
        match (self, correlation) {
            (EntryKind::SaleConsumption, Some(Correlation::Sale(_))) => true,
            (EntryKind::SaleConsumption, _) => false,
            (EntryKind::RecipeConsumption, Some(Correlation::Production(_))) => true,
            (EntryKind::RecipeConsumption, _) => false,
            (EntryKind::ProcurementLot, None | Some(Correlation::Procurement(_))) => true,
            (EntryKind::ProductionLot, None | Some(Correlation::Production(_))) => true,
            (EntryKind::ManualAdjustment, None) => true,
            _ => false,
        }
    }
}

impl core::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle flag of an entry.
///
/// `Active` is the only live state. Roots move to `Exhausted` when their
/// availability reaches zero and take their in-force children with them
/// (`Settled`). Corrected entries become `Superseded`. No transition leads back
/// to `Active`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Exhausted,
    Settled,
    Superseded,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Exhausted => "exhausted",
            EntryStatus::Settled => "settled",
            EntryStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "active" => Ok(EntryStatus::Active),
            "exhausted" => Ok(EntryStatus::Exhausted),
            "settled" => Ok(EntryStatus::Settled),
            "superseded" => Ok(EntryStatus::Superseded),
            other => Err(LedgerError::validation(format!("unknown entry status '{other}'"))),
        }
    }
}

/// Link to the external event that caused an entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Correlation {
    Sale(SaleId),
    Production(ProductionId),
    Procurement(PurchaseId),
}

/// Reason code of an audit annotation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnnotationCode {
    /// Free-text reason supplied with a manual adjustment.
    Adjustment,
    /// The entry was tombstoned by a correction.
    Corrected,
    /// Points from a tombstoned entry to its replacement.
    SupersededBy,
    /// Points from a replacement back to the entry it replaced.
    CorrectionOf,
    /// The lot reached zero availability.
    LotExhausted,
    /// The consumption's lot was exhausted.
    Settled,
}

/// One line of an entry's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub at: DateTime<Utc>,
    pub code: AnnotationCode,
    pub note: String,
}

impl Annotation {
    pub fn new(at: DateTime<Utc>, code: AnnotationCode, note: impl Into<String>) -> Self {
        Self {
            at,
            code,
            note: note.into(),
        }
    }
}

/// A stored ledger movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub partition: PartitionKey,
    pub kind: EntryKind,
    /// Positive on a lot, negative on a draw-down.
    pub quantity: i64,
    /// Smallest currency unit per base unit.
    pub unit_cost: i64,
    pub parent: Option<EntryId>,
    pub supersedes: Option<EntryId>,
    pub correlation: Option<Correlation>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub annotations: Vec<Annotation>,
}

impl LedgerEntry {
    pub fn subject(&self) -> Subject {
        self.partition.subject
    }

    pub fn store(&self) -> StoreId {
        self.partition.store
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }

    /// Counts toward its lot's consumed total (anything not superseded).
    pub fn is_in_force(&self) -> bool {
        self.status != EntryStatus::Superseded
    }

    /// Oldest-first ordering: business date, then write time, then id.
    pub fn fifo_key(&self) -> (DateTime<Utc>, DateTime<Utc>, EntryId) {
        (self.occurred_at, self.created_at, self.id)
    }

    pub fn is_sale_linked(&self) -> bool {
        self.kind == EntryKind::SaleConsumption
            || matches!(self.correlation, Some(Correlation::Sale(_)))
    }
}

/// An entry about to be appended; the store assigns `id`, `created_at` and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub partition: PartitionKey,
    pub kind: EntryKind,
    pub quantity: i64,
    /// Required on roots; children inherit their lot's cost.
    pub unit_cost: Option<i64>,
    pub parent: Option<EntryId>,
    pub supersedes: Option<EntryId>,
    pub correlation: Option<Correlation>,
    pub occurred_at: DateTime<Utc>,
    pub annotations: Vec<Annotation>,
}

impl NewEntry {
    /// An incoming lot.
    pub fn root(
        partition: PartitionKey,
        kind: EntryKind,
        quantity: i64,
        unit_cost: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            partition,
            kind,
            quantity,
            unit_cost: Some(unit_cost),
            parent: None,
            supersedes: None,
            correlation: None,
            occurred_at,
            annotations: Vec::new(),
        }
    }

    /// A draw-down of `taken` units from `lot`.
    pub fn draw(
        partition: PartitionKey,
        kind: EntryKind,
        lot: EntryId,
        taken: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            partition,
            kind,
            quantity: -taken,
            unit_cost: None,
            parent: Some(lot),
            supersedes: None,
            correlation: None,
            occurred_at,
            annotations: Vec::new(),
        }
    }

    pub fn with_correlation(mut self, correlation: Option<Correlation>) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn superseding(mut self, old: EntryId) -> Self {
        self.supersedes = Some(old);
        self
    }

    /// Shape checks that need no partition state.
    pub(crate) fn validate_shape(&self) -> LedgerResult<()> {
        self.partition.validate()?;

        if self.quantity == 0 {
            return Err(LedgerError::validation("quantity cannot be zero"));
        }
        if self.quantity == i64::MIN {
            return Err(LedgerError::validation("quantity is out of range"));
        }
        if let Some(cost) = self.unit_cost {
            if cost < 0 {
                return Err(LedgerError::validation("unit cost cannot be negative"));
            }
        }

        match self.parent {
            None => {
                if self.quantity < 0 {
                    return Err(LedgerError::validation(
                        "a lot must carry a positive quantity",
                    ));
                }
                if !self.kind.may_be_root() {
                    return Err(LedgerError::validation(format!(
                        "{} entries must draw from a lot",
                        self.kind
                    )));
                }
                if self.unit_cost.is_none() {
                    return Err(LedgerError::validation("a lot requires a unit cost"));
                }
            }
            Some(_) => {
                if self.quantity > 0 {
                    return Err(LedgerError::validation(
                        "a draw-down must carry a negative quantity",
                    ));
                }
                if !self.kind.may_be_child() {
                    return Err(LedgerError::validation(format!(
                        "{} entries cannot have a parent",
                        self.kind
                    )));
                }
            }
        }

        if !self.kind.accepts(self.correlation.as_ref()) {
            return Err(LedgerError::validation(format!(
                "{} entries cannot carry correlation {:?}",
                self.kind, self.correlation
            )));
        }

        Ok(())
    }
}
