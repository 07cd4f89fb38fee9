//! Ledger service: validation, logging and metrics around a [`LedgerStore`].

use crate::store::{LedgerLines, LedgerStore, LedgerStoreExt};
use crate::{
    LedgerError, LedgerOp, LedgerRecord, LedgerReference, ResourceId, Result, StockMovement,
};

/// Entry point for every stock mutation.
#[derive(Clone)]
pub struct Ledger<S: LedgerStore> {
    store: S,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates the ledger record for a new resource.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord> {
        let record = self.store.initialize(resource_id, quantity).await?;
        tracing::info!(%resource_id, quantity, "ledger record initialized");
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord> {
        self.single(LedgerOp::Reserve, resource_id, quantity).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn deduct(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord> {
        self.single(LedgerOp::Deduct, resource_id, quantity).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord> {
        self.single(LedgerOp::Release, resource_id, quantity).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_stock(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord> {
        self.single(LedgerOp::AddStock, resource_id, quantity).await
    }

    /// Reserves every line or none.
    #[tracing::instrument(skip(self, lines), fields(source_id = %reference.source_id, lines = lines.len()))]
    pub async fn reserve_batch(
        &self,
        lines: &LedgerLines,
        reference: &LedgerReference,
    ) -> Result<Vec<LedgerRecord>> {
        self.batch(LedgerOp::Reserve, lines, reference).await
    }

    /// Deducts every line or none, consuming the reference's hold.
    #[tracing::instrument(skip(self, lines), fields(source_id = %reference.source_id, lines = lines.len()))]
    pub async fn deduct_batch(
        &self,
        lines: &LedgerLines,
        reference: &LedgerReference,
    ) -> Result<Vec<LedgerRecord>> {
        self.batch(LedgerOp::Deduct, lines, reference).await
    }

    /// Returns whatever is still held for the reference, up to each line's
    /// quantity. Safe to call after a deduct or more than once.
    #[tracing::instrument(skip(self, lines), fields(source_id = %reference.source_id, lines = lines.len()))]
    pub async fn release_batch(
        &self,
        lines: &LedgerLines,
        reference: &LedgerReference,
    ) -> Result<Vec<LedgerRecord>> {
        self.batch(LedgerOp::Release, lines, reference).await
    }

    pub async fn get(&self, resource_id: &ResourceId) -> Result<LedgerRecord> {
        self.store
            .get(resource_id)
            .await?
            .ok_or_else(|| LedgerError::ResourceNotFound(resource_id.clone()))
    }

    pub async fn movements(&self, resource_id: &ResourceId) -> Result<Vec<StockMovement>> {
        self.store.movements(resource_id).await
    }

    async fn single(
        &self,
        op: LedgerOp,
        resource_id: &ResourceId,
        quantity: u32,
    ) -> Result<LedgerRecord> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                resource_id: resource_id.clone(),
                quantity,
            });
        }

        let result = self.store.apply_one(op, resource_id, quantity).await;
        Self::observe(op, &result);
        let record = result?;

        tracing::debug!(
            %resource_id,
            op = op.as_str(),
            quantity,
            available = record.available(),
            reserved = record.reserved(),
            "ledger updated"
        );
        Ok(record)
    }

    async fn batch(
        &self,
        op: LedgerOp,
        lines: &LedgerLines,
        reference: &LedgerReference,
    ) -> Result<Vec<LedgerRecord>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        if let Some((resource_id, quantity)) = lines.iter().find(|(_, qty)| **qty == 0) {
            return Err(LedgerError::InvalidQuantity {
                resource_id: resource_id.clone(),
                quantity: *quantity,
            });
        }

        let result = self.store.apply(op, lines, Some(reference)).await;
        Self::observe(op, &result);
        let records = result?;

        tracing::info!(
            op = op.as_str(),
            source_type = %reference.source_type,
            source_id = %reference.source_id,
            lines = lines.len(),
            "ledger batch applied"
        );
        Ok(records)
    }

    fn observe<T>(op: LedgerOp, result: &Result<T>) {
        match result {
            Ok(_) => {
                metrics::counter!("ledger_operations_total", "op" => op.as_str()).increment(1);
            }
            Err(err) if err.is_contention() => {
                metrics::counter!("ledger_insufficient_stock_total").increment(1);
                tracing::debug!(op = op.as_str(), error = %err, "ledger contention");
            }
            Err(err) => {
                metrics::counter!("ledger_failures_total", "op" => op.as_str()).increment(1);
                tracing::warn!(op = op.as_str(), code = err.code(), error = %err, "ledger operation failed");
            }
        }
    }
}
