use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LedgerError, RequesterId, ResourceId, Result};

/// A mutation the ledger knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerOp {
    Reserve,
    Deduct,
    Release,
    AddStock,
}

impl LedgerOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOp::Reserve => "reserve",
            LedgerOp::Deduct => "deduct",
            LedgerOp::Release => "release",
            LedgerOp::AddStock => "add_stock",
        }
    }

    /// The audit movement recorded when this operation succeeds.
    pub fn movement_type(&self) -> MovementType {
        match self {
            LedgerOp::Reserve => MovementType::Reserve,
            LedgerOp::Deduct => MovementType::Deduct,
            LedgerOp::Release => MovementType::Release,
            LedgerOp::AddStock => MovementType::Inbound,
        }
    }
}

impl std::fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of stock movement recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Initial,
    Reserve,
    Deduct,
    Release,
    Inbound,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Initial => "INITIAL",
            MovementType::Reserve => "RESERVE",
            MovementType::Deduct => "DEDUCT",
            MovementType::Release => "RELEASE",
            MovementType::Inbound => "INBOUND",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIAL" => Some(MovementType::Initial),
            "RESERVE" => Some(MovementType::Reserve),
            "DEDUCT" => Some(MovementType::Deduct),
            "RELEASE" => Some(MovementType::Release),
            "INBOUND" => Some(MovementType::Inbound),
            _ => None,
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who asked for a batch mutation and on whose behalf.
///
/// `source_id` (for orders, the order number) also keys the reservation hold,
/// so a reserve under `ORDER` and a release under `ORDER_CANCEL` for the same
/// order share one hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReference {
    pub source_type: String,
    pub source_id: String,
    pub requester_id: RequesterId,
}

impl LedgerReference {
    pub fn new(
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        requester_id: RequesterId,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            source_id: source_id.into(),
            requester_id,
        }
    }

    /// Reference for stock reserved or consumed by an order.
    pub fn order(order_number: impl Into<String>, requester_id: RequesterId) -> Self {
        Self::new("ORDER", order_number, requester_id)
    }

    /// Reference for stock returned when an order is cancelled.
    pub fn order_cancel(order_number: impl Into<String>) -> Self {
        Self::new("ORDER_CANCEL", order_number, RequesterId::system())
    }
}

/// Quantities for one resource.
///
/// Fields are private so that every mutation goes through a method that
/// keeps `available + reserved == total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    resource_id: ResourceId,
    available: u32,
    reserved: u32,
    total: u32,
    updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    /// Creates a record with `quantity` units available and nothing reserved.
    pub fn new(resource_id: ResourceId, quantity: u32) -> Self {
        Self {
            resource_id,
            available: quantity,
            reserved: 0,
            total: quantity,
            updated_at: Utc::now(),
        }
    }

    /// Rebuilds a record from persisted values, rejecting rows that break the
    /// invariant.
    pub fn from_parts(
        resource_id: ResourceId,
        available: u32,
        reserved: u32,
        total: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<Self> {
        if available.checked_add(reserved) != Some(total) {
            return Err(LedgerError::InvalidRecord(format!(
                "{resource_id}: available {available} + reserved {reserved} != total {total}"
            )));
        }
        Ok(Self {
            resource_id,
            available,
            reserved,
            total,
            updated_at,
        })
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if `available + reserved == total`.
    pub fn is_consistent(&self) -> bool {
        self.available.checked_add(self.reserved) == Some(self.total)
    }

    /// Moves `quantity` from available to reserved.
    pub fn reserve(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        if quantity > self.available {
            return Err(LedgerError::InsufficientStock {
                resource_id: self.resource_id.clone(),
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        self.reserved += quantity;
        self.touch();
        Ok(())
    }

    /// Consumes `quantity` reserved units; they leave the total.
    pub fn deduct(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        if quantity > self.reserved {
            return Err(LedgerError::StockDeductionFailed {
                resource_id: self.resource_id.clone(),
                requested: quantity,
                reserved: self.reserved,
            });
        }
        self.reserved -= quantity;
        self.total -= quantity;
        self.touch();
        Ok(())
    }

    /// Returns `quantity` reserved units to available.
    pub fn release(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        if quantity > self.reserved {
            return Err(LedgerError::StockReleaseFailed {
                resource_id: self.resource_id.clone(),
                requested: quantity,
                reserved: self.reserved,
            });
        }
        self.reserved -= quantity;
        self.available += quantity;
        self.touch();
        Ok(())
    }

    /// Adds inbound units to available and total.
    pub fn add_stock(&mut self, quantity: u32) -> Result<()> {
        self.check_quantity(quantity)?;
        let total = self
            .total
            .checked_add(quantity)
            .ok_or_else(|| LedgerError::QuantityOverflow(self.resource_id.clone()))?;
        self.available += quantity;
        self.total = total;
        self.touch();
        Ok(())
    }

    pub fn apply(&mut self, op: LedgerOp, quantity: u32) -> Result<()> {
        match op {
            LedgerOp::Reserve => self.reserve(quantity),
            LedgerOp::Deduct => self.deduct(quantity),
            LedgerOp::Release => self.release(quantity),
            LedgerOp::AddStock => self.add_stock(quantity),
        }
    }

    fn check_quantity(&self, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                resource_id: self.resource_id.clone(),
                quantity,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One row of the stock audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub resource_id: ResourceId,
    pub movement_type: MovementType,
    pub quantity: u32,
    pub available_before: u32,
    pub available_after: u32,
    pub reserved_before: u32,
    pub reserved_after: u32,
    pub reference: Option<LedgerReference>,
    pub recorded_at: DateTime<Utc>,
}

impl StockMovement {
    /// Records the transition from `before` to `after`.
    pub fn between(
        movement_type: MovementType,
        quantity: u32,
        before: &LedgerRecord,
        after: &LedgerRecord,
        reference: Option<&LedgerReference>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: after.resource_id.clone(),
            movement_type,
            quantity,
            available_before: before.available,
            available_after: after.available,
            reserved_before: before.reserved,
            reserved_after: after.reserved,
            reference: reference.cloned(),
            recorded_at: after.updated_at,
        }
    }

    /// Records the creation of a record.
    pub fn initial(record: &LedgerRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: record.resource_id.clone(),
            movement_type: MovementType::Initial,
            quantity: record.total,
            available_before: 0,
            available_after: record.available,
            reserved_before: 0,
            reserved_after: record.reserved,
            reference: None,
            recorded_at: record.updated_at,
        }
    }
}

/// Result of applying a batch to locked records, ready to be persisted.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Every record named by the batch, in resource-id order.
    pub records: Vec<LedgerRecord>,
    /// New hold per resource for the batch reference. Zero means "drop".
    pub holds: Vec<(ResourceId, u32)>,
    pub movements: Vec<StockMovement>,
}

/// Applies every line of a batch to copies of `records`.
///
/// Nothing is written: if any line fails the error is returned and the
/// caller discards the outcome, which leaves every record untouched.
///
/// When a reference is given, `holds` carries what is currently held for it.
/// A release moves at most the held quantity and skips lines with nothing
/// held, so releasing after a deduct (or twice) is a no-op.
pub fn plan_batch(
    op: LedgerOp,
    lines: &BTreeMap<ResourceId, u32>,
    records: &BTreeMap<ResourceId, LedgerRecord>,
    holds: &HashMap<ResourceId, u32>,
    reference: Option<&LedgerReference>,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();

    for (resource_id, &requested) in lines {
        let before = records
            .get(resource_id)
            .ok_or_else(|| LedgerError::ResourceNotFound(resource_id.clone()))?;

        if requested == 0 {
            return Err(LedgerError::InvalidQuantity {
                resource_id: resource_id.clone(),
                quantity: requested,
            });
        }

        let held = holds.get(resource_id).copied().unwrap_or(0);
        let quantity = match (op, reference) {
            (LedgerOp::Release, Some(_)) => requested.min(held),
            _ => requested,
        };

        if quantity == 0 {
            outcome.records.push(before.clone());
            continue;
        }

        let mut after = before.clone();
        after.apply(op, quantity)?;

        if reference.is_some() {
            let next_hold = match op {
                LedgerOp::Reserve => held.saturating_add(quantity),
                LedgerOp::Deduct | LedgerOp::Release => held.saturating_sub(quantity),
                LedgerOp::AddStock => held,
            };
            if next_hold != held {
                outcome.holds.push((resource_id.clone(), next_hold));
            }
        }

        outcome.movements.push(StockMovement::between(
            op.movement_type(),
            quantity,
            before,
            &after,
            reference,
        ));
        outcome.records.push(after);
    }

    Ok(outcome)
}
