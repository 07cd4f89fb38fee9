use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{LedgerOp, LedgerRecord, LedgerReference, ResourceId, Result, StockMovement};

/// Quantities per resource for a batch. Ordered so that records are always
/// locked in ascending resource-id order.
pub type LedgerLines = BTreeMap<ResourceId, u32>;

/// Durable storage for ledger records.
///
/// `apply` is the only mutating primitive for existing records and must be
/// atomic with respect to concurrent callers on the same resource ids:
/// either every line is applied or none is.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates a record with `quantity` available units.
    ///
    /// Fails with `ResourceAlreadyExists` if the resource already has one.
    async fn initialize(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord>;

    /// Applies `op` to every line.
    ///
    /// With a reference, the per-reference hold is updated in the same
    /// transaction (see [`crate::record::plan_batch`]).
    ///
    /// Returns the records after the mutation, in resource-id order.
    async fn apply(
        &self,
        op: LedgerOp,
        lines: &LedgerLines,
        reference: Option<&LedgerReference>,
    ) -> Result<Vec<LedgerRecord>>;

    /// Gets the record for a resource.
    async fn get(&self, resource_id: &ResourceId) -> Result<Option<LedgerRecord>>;

    /// Quantity currently held for `source_id` on `resource_id`.
    async fn held(&self, source_id: &str, resource_id: &ResourceId) -> Result<u32>;

    /// Audit trail for a resource, newest first.
    async fn movements(&self, resource_id: &ResourceId) -> Result<Vec<StockMovement>>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Applies `op` to a single resource without a reference.
    async fn apply_one(
        &self,
        op: LedgerOp,
        resource_id: &ResourceId,
        quantity: u32,
    ) -> Result<LedgerRecord> {
        let mut lines = LedgerLines::new();
        lines.insert(resource_id.clone(), quantity);
        let mut records = self.apply(op, &lines, None).await?;
        records
            .pop()
            .ok_or_else(|| crate::LedgerError::ResourceNotFound(resource_id.clone()))
    }

    /// Checks if a resource has a ledger record.
    async fn exists(&self, resource_id: &ResourceId) -> Result<bool> {
        Ok(self.get(resource_id).await?.is_some())
    }
}

// Blanket implementation for all LedgerStore implementations
impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}

#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    async fn initialize(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord> {
        (**self).initialize(resource_id, quantity).await
    }

    async fn apply(
        &self,
        op: LedgerOp,
        lines: &LedgerLines,
        reference: Option<&LedgerReference>,
    ) -> Result<Vec<LedgerRecord>> {
        (**self).apply(op, lines, reference).await
    }

    async fn get(&self, resource_id: &ResourceId) -> Result<Option<LedgerRecord>> {
        (**self).get(resource_id).await
    }

    async fn held(&self, source_id: &str, resource_id: &ResourceId) -> Result<u32> {
        (**self).held(source_id, resource_id).await
    }

    async fn movements(&self, resource_id: &ResourceId) -> Result<Vec<StockMovement>> {
        (**self).movements(resource_id).await
    }
}
