//! Boundary operations: every write the outside world can ask for.
//!
//! Each command knows the partitions it touches (`partitions()`), so a store
//! can lock them up front; the matching function then runs inside that
//! transaction against a `UnitOfWork`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    EntryId, LedgerError, LedgerResult, PartitionKey, ProductId, ProductionId, PurchaseId, SaleId,
    StoreId, Subject,
};

use crate::allocator;
use crate::entry::{Annotation, AnnotationCode, Correlation, EntryKind, NewEntry};
use crate::events::{AdjustmentRecorded, ConsumedDraw, LedgerEvent, LotReceived, StockConsumed};
use crate::unit_of_work::UnitOfWork;

fn require_reason(reason: &str) -> LedgerResult<&str> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::validation("a reason is required"));
    }
    Ok(reason)
}

// ─────────────────────────────────────────────────────────────────────────────
// Receiving
// ─────────────────────────────────────────────────────────────────────────────

/// Where an incoming lot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum LotSource {
    Procurement(Option<PurchaseId>),
    Production(Option<ProductionId>),
}

impl LotSource {
    fn kind(self) -> EntryKind {
        match self {
            LotSource::Procurement(_) => EntryKind::ProcurementLot,
            LotSource::Production(_) => EntryKind::ProductionLot,
        }
    }

    fn correlation(self) -> Option<Correlation> {
        match self {
            LotSource::Procurement(purchase) => purchase.map(Correlation::Procurement),
            LotSource::Production(run) => run.map(Correlation::Production),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLot {
    pub partition: PartitionKey,
    pub quantity: i64,
    pub unit_cost: i64,
    pub source: LotSource,
    pub occurred_at: DateTime<Utc>,
}

impl ReceiveLot {
    pub fn partitions(&self) -> Vec<PartitionKey> {
        vec![self.partition]
    }
}

pub fn receive_lot(uow: &mut UnitOfWork, cmd: &ReceiveLot) -> LedgerResult<EntryId> {
    if cmd.quantity <= 0 {
        return Err(LedgerError::validation("a received lot needs a positive quantity"));
    }
    let new = NewEntry::root(
        cmd.partition,
        cmd.source.kind(),
        cmd.quantity,
        cmd.unit_cost,
        cmd.occurred_at,
    )
    .with_correlation(cmd.source.correlation());
    let lot = uow.append(new)?;

    uow.emit(LedgerEvent::LotReceived(LotReceived {
        partition: cmd.partition,
        lot,
        kind: cmd.source.kind(),
        quantity: cmd.quantity,
        unit_cost: cmd.unit_cost,
        correlation: cmd.source.correlation(),
        occurred_at: cmd.occurred_at,
    }));
    tracing::info!(partition = %cmd.partition, lot = %lot, quantity = cmd.quantity, "lot received");
    Ok(lot)
}

// ─────────────────────────────────────────────────────────────────────────────
// Consumption
// ─────────────────────────────────────────────────────────────────────────────

/// Why stock leaves the ledger; decides the draw-down kind and correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConsumptionCause {
    Sale(SaleId),
    Production(ProductionId),
    /// Operator withdrawal (shrinkage, samples, write-offs).
    Withdrawal { reason: String },
}

impl ConsumptionCause {
    pub fn withdrawal(reason: impl Into<String>) -> Self {
        ConsumptionCause::Withdrawal {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            ConsumptionCause::Sale(_) => EntryKind::SaleConsumption,
            ConsumptionCause::Production(_) => EntryKind::RecipeConsumption,
            ConsumptionCause::Withdrawal { .. } => EntryKind::ManualAdjustment,
        }
    }

    pub fn correlation(&self) -> Option<Correlation> {
        match self {
            ConsumptionCause::Sale(sale) => Some(Correlation::Sale(*sale)),
            ConsumptionCause::Production(run) => Some(Correlation::Production(*run)),
            ConsumptionCause::Withdrawal { .. } => None,
        }
    }

    fn annotation(&self, at: DateTime<Utc>) -> Option<Annotation> {
        match self {
            ConsumptionCause::Withdrawal { reason } => {
                Some(Annotation::new(at, AnnotationCode::Adjustment, reason.trim()))
            }
            _ => None,
        }
    }

    fn validate(&self) -> LedgerResult<()> {
        match self {
            ConsumptionCause::Sale(sale) => sale.validate().map(|_| ()),
            ConsumptionCause::Production(run) => run.validate().map(|_| ()),
            ConsumptionCause::Withdrawal { reason } => require_reason(reason).map(|_| ()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub partition: PartitionKey,
    pub quantity: i64,
    pub cause: ConsumptionCause,
    pub occurred_at: DateTime<Utc>,
}

impl ConsumeRequest {
    pub fn new(
        partition: PartitionKey,
        quantity: i64,
        cause: ConsumptionCause,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            partition,
            quantity,
            cause,
            occurred_at,
        }
    }

    pub fn partitions(&self) -> Vec<PartitionKey> {
        vec![self.partition]
    }
}

/// The draw-downs written for one demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub partition: PartitionKey,
    pub requested: i64,
    pub draws: Vec<ConsumedDraw>,
}

impl Allocation {
    /// Cost of goods drawn, at each lot's own unit cost.
    pub fn total_cost(&self) -> i64 {
        self.draws
            .iter()
            .map(|d| d.quantity.saturating_mul(d.unit_cost))
            .fold(0i64, i64::saturating_add)
    }
}

/// Plan against the locked partition and write one draw-down per lot touched.
fn allocate(uow: &mut UnitOfWork, req: &ConsumeRequest) -> LedgerResult<Allocation> {
    req.cause.validate()?;
    let plan = allocator::plan(uow.partition(req.partition)?, req.quantity)?;

    let now = uow.now();
    let mut draws = Vec::with_capacity(plan.len());
    for draw in plan {
        let mut new = NewEntry::draw(
            req.partition,
            req.cause.kind(),
            draw.lot,
            draw.quantity,
            req.occurred_at,
        )
        .with_correlation(req.cause.correlation());
        if let Some(note) = req.cause.annotation(now) {
            new = new.with_annotation(note);
        }
        let entry = uow.append(new)?;
        draws.push(ConsumedDraw {
            entry,
            lot: draw.lot,
            quantity: draw.quantity,
            unit_cost: draw.unit_cost,
        });
    }

    Ok(Allocation {
        partition: req.partition,
        requested: req.quantity,
        draws,
    })
}

/// FIFO consumption: oldest lots first, all or nothing.
pub fn consume(uow: &mut UnitOfWork, req: &ConsumeRequest) -> LedgerResult<Allocation> {
    let allocation = allocate(uow, req)?;

    uow.emit(LedgerEvent::StockConsumed(StockConsumed {
        partition: req.partition,
        kind: req.cause.kind(),
        correlation: req.cause.correlation(),
        requested: req.quantity,
        draws: allocation.draws.clone(),
        occurred_at: req.occurred_at,
    }));
    tracing::info!(
        partition = %req.partition,
        requested = req.quantity,
        lots = allocation.draws.len(),
        kind = %req.cause.kind(),
        "stock consumed"
    );
    Ok(allocation)
}

// ─────────────────────────────────────────────────────────────────────────────
// Manual adjustments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAdjustment {
    pub partition: PartitionKey,
    /// Signed: positive adds found stock, negative removes it.
    pub quantity: i64,
    /// Required when adding stock.
    pub unit_cost: Option<i64>,
    /// Lot to draw from when removing; FIFO when absent.
    pub lot: Option<EntryId>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl RecordAdjustment {
    pub fn increase(
        partition: PartitionKey,
        quantity: i64,
        unit_cost: i64,
        reason: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            partition,
            quantity,
            unit_cost: Some(unit_cost),
            lot: None,
            reason: reason.into(),
            occurred_at,
        }
    }

    pub fn decrease(
        partition: PartitionKey,
        quantity: i64,
        lot: Option<EntryId>,
        reason: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            partition,
            quantity: -quantity,
            unit_cost: None,
            lot,
            reason: reason.into(),
            occurred_at,
        }
    }

    pub fn partitions(&self) -> Vec<PartitionKey> {
        vec![self.partition]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub partition: PartitionKey,
    pub quantity: i64,
    entries: Vec<EntryId>,
}

impl Adjustment {
    /// Entries written: one root for an increase, one or more draw-downs otherwise.
    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }
}

pub fn record_adjustment(uow: &mut UnitOfWork, cmd: &RecordAdjustment) -> LedgerResult<Adjustment> {
    let reason = require_reason(&cmd.reason)?.to_string();
    let now = uow.now();
    let note = Annotation::new(now, AnnotationCode::Adjustment, reason.clone());

    let entries = match (cmd.quantity.signum(), cmd.lot) {
        (0, _) => return Err(LedgerError::validation("adjustment quantity cannot be zero")),
        (1, Some(_)) => {
            return Err(LedgerError::validation(
                "an increase creates its own lot and cannot target one",
            ));
        }
        (1, None) => {
            let cost = cmd
                .unit_cost
                .ok_or_else(|| LedgerError::validation("an increase requires a unit cost"))?;
            let new = NewEntry::root(
                cmd.partition,
                EntryKind::ManualAdjustment,
                cmd.quantity,
                cost,
                cmd.occurred_at,
            )
            .with_annotation(note);
            vec![uow.append(new)?]
        }
        (_, lot) => {
            if cmd.unit_cost.is_some() {
                return Err(LedgerError::validation(
                    "a decrease is valued at its lot's unit cost",
                ));
            }
            let magnitude = cmd.quantity.checked_neg().ok_or_else(|| {
                LedgerError::validation("adjustment quantity is out of range")
            })?;
            match lot {
                Some(lot) => {
                    let new = NewEntry::draw(
                        cmd.partition,
                        EntryKind::ManualAdjustment,
                        lot,
                        magnitude,
                        cmd.occurred_at,
                    )
                    .with_annotation(note);
                    vec![uow.append(new)?]
                }
                None => {
                    let req = ConsumeRequest::new(
                        cmd.partition,
                        magnitude,
                        ConsumptionCause::withdrawal(reason.clone()),
                        cmd.occurred_at,
                    );
                    allocate(uow, &req)?.draws.into_iter().map(|d| d.entry).collect()
                }
            }
        }
    };

    uow.emit(LedgerEvent::AdjustmentRecorded(AdjustmentRecorded {
        partition: cmd.partition,
        entries: entries.clone(),
        quantity: cmd.quantity,
        reason: reason.clone(),
        occurred_at: cmd.occurred_at,
    }));
    tracing::info!(
        partition = %cmd.partition,
        quantity = cmd.quantity,
        entries = entries.len(),
        reason = %reason,
        "adjustment recorded"
    );

    Ok(Adjustment {
        partition: cmd.partition,
        quantity: cmd.quantity,
        entries,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Sales
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleFulfillment {
    pub sale: SaleId,
    pub store: StoreId,
    pub lines: Vec<SaleLine>,
    pub occurred_at: DateTime<Utc>,
}

impl SaleFulfillment {
    fn key(&self, line: &SaleLine) -> PartitionKey {
        PartitionKey::new(Subject::Product(line.product), self.store)
    }

    pub fn partitions(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self.lines.iter().map(|l| self.key(l)).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleOutcome {
    pub sale: SaleId,
    /// One allocation per line, in line order.
    pub lines: Vec<Allocation>,
}

impl SaleOutcome {
    pub fn cost_of_goods(&self) -> i64 {
        self.lines.iter().map(Allocation::total_cost).fold(0, i64::saturating_add)
    }
}

/// Sum demands per partition; duplicate subjects are checked as one demand.
fn aggregate(
    demands: impl IntoIterator<Item = (PartitionKey, i64)>,
) -> LedgerResult<BTreeMap<PartitionKey, i64>> {
    let mut totals = BTreeMap::new();
    for (key, quantity) in demands {
        key.validate()?;
        if quantity <= 0 {
            return Err(LedgerError::validation(format!(
                "quantity for {key} must be positive (got {quantity})"
            )));
        }
        let total: &mut i64 = totals.entry(key).or_default();
        *total = total
            .checked_add(quantity)
            .ok_or_else(|| LedgerError::validation(format!("demand for {key} overflows")))?;
    }
    Ok(totals)
}

fn ensure_all_covered(uow: &UnitOfWork, totals: &BTreeMap<PartitionKey, i64>) -> LedgerResult<()> {
    for (key, demand) in totals {
        allocator::ensure_coverage(uow.partition(*key)?, *demand)?;
    }
    Ok(())
}

/// Every line or none: all demands are checked before the first draw-down.
pub fn fulfill_sale(uow: &mut UnitOfWork, cmd: &SaleFulfillment) -> LedgerResult<SaleOutcome> {
    cmd.sale.validate()?;
    if cmd.lines.is_empty() {
        return Err(LedgerError::validation("a sale needs at least one line"));
    }
    let totals = aggregate(cmd.lines.iter().map(|l| (cmd.key(l), l.quantity)))?;
    ensure_all_covered(uow, &totals)?;

    let mut lines = Vec::with_capacity(cmd.lines.len());
    for line in &cmd.lines {
        let req = ConsumeRequest::new(
            cmd.key(line),
            line.quantity,
            ConsumptionCause::Sale(cmd.sale),
            cmd.occurred_at,
        );
        lines.push(consume(uow, &req)?);
    }

    tracing::info!(sale = %cmd.sale, store = %cmd.store, lines = lines.len(), "sale fulfilled");
    Ok(SaleOutcome { sale: cmd.sale, lines })
}

// ─────────────────────────────────────────────────────────────────────────────
// Production
// ─────────────────────────────────────────────────────────────────────────────

/// One bill-of-materials line: how much of a subject goes into one produced unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub subject: Subject,
    pub per_unit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionRun {
    pub production: ProductionId,
    pub store: StoreId,
    pub produced: i64,
    pub ingredients: Vec<Ingredient>,
    /// Product receiving the output lot; `None` records consumption only.
    pub output: Option<ProductId>,
    pub occurred_at: DateTime<Utc>,
}

impl ProductionRun {
    fn key(&self, subject: Subject) -> PartitionKey {
        PartitionKey::new(subject, self.store)
    }

    pub fn partitions(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self
            .ingredients
            .iter()
            .map(|i| self.key(i.subject))
            .chain(self.output.map(|p| self.key(Subject::Product(p))))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn demands(&self) -> LedgerResult<Vec<(PartitionKey, i64)>> {
        self.ingredients
            .iter()
            .map(|i| {
                if i.per_unit <= 0 {
                    return Err(LedgerError::validation(format!(
                        "ingredient {} needs a positive quantity per unit",
                        i.subject
                    )));
                }
                let total = i.per_unit.checked_mul(self.produced).ok_or_else(|| {
                    LedgerError::validation(format!("demand for {} overflows", i.subject))
                })?;
                Ok((self.key(i.subject), total))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionOutcome {
    pub production: ProductionId,
    /// One allocation per ingredient, in bill-of-materials order.
    pub consumed: Vec<Allocation>,
    pub ingredient_cost: i64,
    pub output_lot: Option<EntryId>,
    /// Cost per produced unit carried by the output lot.
    pub unit_cost: i64,
}

/// Consume every ingredient and optionally receive the output, atomically.
pub fn complete_production(
    uow: &mut UnitOfWork,
    cmd: &ProductionRun,
) -> LedgerResult<ProductionOutcome> {
    cmd.production.validate()?;
    if cmd.produced <= 0 {
        return Err(LedgerError::validation("produced amount must be positive"));
    }
    if cmd.ingredients.is_empty() {
        return Err(LedgerError::validation("a production run needs at least one ingredient"));
    }
    let demands = cmd.demands()?;
    let totals = aggregate(demands.iter().copied())?;
    ensure_all_covered(uow, &totals)?;

    let mut consumed = Vec::with_capacity(demands.len());
    for (key, quantity) in demands {
        let req = ConsumeRequest::new(
            key,
            quantity,
            ConsumptionCause::Production(cmd.production),
            cmd.occurred_at,
        );
        consumed.push(consume(uow, &req)?);
    }
    let ingredient_cost = consumed
        .iter()
        .map(Allocation::total_cost)
        .fold(0, i64::saturating_add);
    let unit_cost = ingredient_cost / cmd.produced;

    let output_lot = match cmd.output {
        Some(product) => Some(receive_lot(
            uow,
            &ReceiveLot {
                partition: cmd.key(Subject::Product(product)),
                quantity: cmd.produced,
                unit_cost,
                source: LotSource::Production(Some(cmd.production)),
                occurred_at: cmd.occurred_at,
            },
        )?),
        None => None,
    };

    tracing::info!(
        production = %cmd.production,
        produced = cmd.produced,
        ingredients = consumed.len(),
        ingredient_cost,
        "production completed"
    );
    Ok(ProductionOutcome {
        production: cmd.production,
        consumed,
        ingredient_cost,
        output_lot,
        unit_cost,
    })
}
