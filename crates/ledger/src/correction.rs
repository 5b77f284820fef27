//! Correction (tombstone + replacement) and annulment (erase) of entries.

use serde::{Deserialize, Serialize};

use stockledger_core::{ConflictReason, EntryId, LedgerError, LedgerResult};

use crate::entry::{Annotation, AnnotationCode, EntryKind, LedgerEntry, NewEntry};
use crate::events::{EntryAnnulled, EntryCorrected, LedgerEvent};
use crate::unit_of_work::UnitOfWork;

/// Which kinds may be superseded by a correction.
pub fn correction_eligibility(kind: EntryKind) -> Result<(), ConflictReason> {
    match kind {
        EntryKind::ProcurementLot | EntryKind::ProductionLot | EntryKind::ManualAdjustment => Ok(()),
        EntryKind::SaleConsumption => Err(ConflictReason::SaleLinked),
        EntryKind::RecipeConsumption => Err(ConflictReason::ProductionLinked),
    }
}

/// Which kinds may be physically removed.
pub fn annulment_eligibility(kind: EntryKind) -> Result<(), ConflictReason> {
    match kind {
        EntryKind::ManualAdjustment => Ok(()),
        EntryKind::SaleConsumption => Err(ConflictReason::SaleLinked),
        EntryKind::RecipeConsumption => Err(ConflictReason::ProductionLinked),
        EntryKind::ProcurementLot | EntryKind::ProductionLot => {
            Err(ConflictReason::NotManualAdjustment)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectEntry {
    pub entry: EntryId,
    /// Same sign as the original: positive for a lot, negative for a draw-down.
    pub quantity: i64,
    /// Lots only; a draw-down always carries its lot's cost.
    pub unit_cost: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub superseded: EntryId,
    pub replacement: EntryId,
    /// The lot whose bookkeeping was re-run.
    pub lot: EntryId,
    pub lot_exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnulEntry {
    pub entry: EntryId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annulment {
    pub removed: LedgerEntry,
}

fn require_reason(reason: &str) -> LedgerResult<&str> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::validation("a reason is required"));
    }
    Ok(reason)
}

/// Preconditions shared by correction and annulment, in reporting order.
fn check_mutable(
    uow: &UnitOfWork,
    entry: &LedgerEntry,
    eligibility: fn(EntryKind) -> Result<(), ConflictReason>,
) -> LedgerResult<()> {
    if !entry.is_active() {
        return Err(LedgerError::conflict(ConflictReason::Inactive));
    }
    eligibility(entry.kind).map_err(LedgerError::conflict)?;
    if uow.partition(entry.partition)?.has_dependents(entry.id) {
        return Err(LedgerError::conflict(ConflictReason::HasDependents));
    }
    Ok(())
}

/// Supersede an entry with a corrected copy.
///
/// Two writes: the original is tombstoned (quantity and cost untouched, reason
/// appended) and a replacement with the same partition, parent, kind and
/// business date is appended with a cross-reference back.
pub fn correct(uow: &mut UnitOfWork, cmd: &CorrectEntry) -> LedgerResult<Correction> {
    let reason = require_reason(&cmd.reason)?.to_string();
    let old = uow.entry(cmd.entry)?.clone();
    check_mutable(uow, &old, correction_eligibility)?;

    if old.is_root() && cmd.quantity <= 0 {
        return Err(LedgerError::validation("a corrected lot keeps a positive quantity"));
    }
    if !old.is_root() && cmd.quantity >= 0 {
        return Err(LedgerError::validation(
            "a corrected draw-down keeps a negative quantity",
        ));
    }
    // Units a corrected draw-down takes from its lot.
    let taken = cmd
        .quantity
        .checked_neg()
        .ok_or_else(|| LedgerError::validation("corrected quantity is out of range"))?;
    let new_cost = match (old.parent, cmd.unit_cost) {
        (None, Some(cost)) => cost,
        (None, None) => old.unit_cost,
        (Some(_), Some(cost)) if cost != old.unit_cost => {
            return Err(LedgerError::validation(
                "a draw-down's unit cost follows its lot and cannot be corrected",
            ));
        }
        (Some(_), _) => old.unit_cost,
    };
    if cmd.quantity == old.quantity && new_cost == old.unit_cost {
        return Err(LedgerError::conflict(ConflictReason::NoOp));
    }

    let key = old.partition;
    if let Some(lot) = old.parent {
        let extra = taken - old.quantity.abs();
        if extra > 0 {
            let available = uow.partition(key)?.availability(lot)?;
            if extra > available {
                return Err(LedgerError::InsufficientStock {
                    subject: key.subject,
                    store: key.store,
                    requested: taken,
                    available: available + old.quantity.abs(),
                    shortfall: extra - available,
                });
            }
        }
    }

    let now = uow.now();
    uow.tombstone(
        old.id,
        Annotation::new(now, AnnotationCode::Corrected, reason.clone()),
    )?;

    let mut replacement = match old.parent {
        None => NewEntry::root(key, old.kind, cmd.quantity, new_cost, old.occurred_at),
        Some(lot) => NewEntry::draw(key, old.kind, lot, taken, old.occurred_at),
    }
    .with_correlation(old.correlation)
    .superseding(old.id);
    replacement.annotations = old
        .annotations
        .iter()
        .filter(|a| a.code == AnnotationCode::Adjustment)
        .cloned()
        .collect();
    replacement.annotations.push(Annotation::new(
        now,
        AnnotationCode::CorrectionOf,
        format!(
            "entry {}: quantity {} -> {}, unit cost {} -> {}; {}",
            old.id, old.quantity, cmd.quantity, old.unit_cost, new_cost, reason
        ),
    ));
    let new_id = uow.append(replacement)?;

    uow.annotate(
        old.id,
        Annotation::new(now, AnnotationCode::SupersededBy, format!("entry {new_id}")),
    )?;

    let lot = old.parent.unwrap_or(new_id);
    // `append` already reconciled a draw-down's lot; a replacement lot is checked here.
    let lot_exhausted = match old.parent {
        Some(_) => !uow.entry(lot)?.is_active(),
        None => uow.reconcile(key, lot)?.is_some(),
    };

    uow.emit(LedgerEvent::EntryCorrected(EntryCorrected {
        partition: key,
        superseded: old.id,
        replacement: new_id,
        old_quantity: old.quantity,
        new_quantity: cmd.quantity,
        old_unit_cost: old.unit_cost,
        new_unit_cost: new_cost,
        reason,
        occurred_at: now,
    }));

    tracing::info!(
        partition = %key,
        superseded = %old.id,
        replacement = %new_id,
        old_quantity = old.quantity,
        new_quantity = cmd.quantity,
        "entry corrected"
    );

    Ok(Correction {
        superseded: old.id,
        replacement: new_id,
        lot,
        lot_exhausted,
    })
}

/// Physically remove a manual adjustment that nothing depends on.
pub fn annul(uow: &mut UnitOfWork, cmd: &AnnulEntry) -> LedgerResult<Annulment> {
    let reason = require_reason(&cmd.reason)?.to_string();
    let entry = uow.entry(cmd.entry)?.clone();
    check_mutable(uow, &entry, annulment_eligibility)?;

    let removed = uow.erase(entry.id)?;
    if let Some(lot) = removed.parent {
        uow.reconcile(removed.partition, lot)?;
    }

    uow.emit(LedgerEvent::EntryAnnulled(EntryAnnulled {
        partition: removed.partition,
        entry: removed.id,
        kind: removed.kind,
        quantity: removed.quantity,
        parent: removed.parent,
        reason: reason.clone(),
        occurred_at: uow.now(),
    }));

    tracing::info!(
        partition = %removed.partition,
        entry = %removed.id,
        quantity = removed.quantity,
        reason = %reason,
        "entry annulled"
    );

    Ok(Annulment { removed })
}
