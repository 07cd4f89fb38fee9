//! The allocation service.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::arbitration::{ArbitrationStore, ClaimOutcome};
use crate::repository::{AllocationRecord, AllocationRepository};
use crate::{AllocationError, RequesterId, ResourceId, Result, SaleWindow};

/// A successful claim.
#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub record: AllocationRecord,
    /// Units left for the resource right after this claim.
    pub remaining: u32,
}

/// Grants scarce units first-come-first-served, never more than the supply
/// and never more than a requester's cap.
pub struct Allocator<A, R>
where
    A: ArbitrationStore,
    R: AllocationRepository,
{
    arbitration: A,
    repository: R,
}

impl<A, R> Allocator<A, R>
where
    A: ArbitrationStore,
    R: AllocationRepository,
{
    pub fn new(arbitration: A, repository: R) -> Self {
        Self {
            arbitration,
            repository,
        }
    }

    /// Makes `total` units claimable.
    #[tracing::instrument(skip(self))]
    pub async fn open(&self, resource_id: &ResourceId, total: u32) -> Result<()> {
        self.arbitration.open(resource_id, total).await?;
        tracing::info!(%resource_id, total, "resource opened for allocation");
        Ok(())
    }

    /// Stops accepting claims and drops arbitration state.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self, resource_id: &ResourceId) -> Result<()> {
        self.arbitration.close(resource_id).await?;
        tracing::info!(%resource_id, "resource closed for allocation");
        Ok(())
    }

    /// Claims `quantity` units of `resource_id` for `requester_id`, who may
    /// hold at most `limit` units.
    ///
    /// Arbitration runs first; the durable record is written only for a
    /// granted claim. If that write fails the claim is rolled back before the
    /// error is returned.
    #[tracing::instrument(skip(self, resource_id, requester_id), fields(%resource_id, %requester_id))]
    pub async fn allocate(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
        limit: u32,
    ) -> Result<Allocation> {
        if quantity == 0 || limit == 0 {
            return Err(AllocationError::InvalidQuantity { quantity, limit });
        }

        metrics::counter!("allocation_attempts_total").increment(1);
        let start = std::time::Instant::now();

        let outcome = self
            .arbitration
            .try_claim(resource_id, requester_id, quantity, limit)
            .await?;
        metrics::histogram!("allocation_arbitration_seconds")
            .record(start.elapsed().as_secs_f64());

        let remaining = match outcome {
            ClaimOutcome::Granted { remaining } => remaining,
            ClaimOutcome::SoldOut => {
                metrics::counter!("allocation_sold_out_total").increment(1);
                tracing::debug!("sold out");
                return Err(AllocationError::SoldOut(resource_id.clone()));
            }
            ClaimOutcome::LimitExceeded => {
                metrics::counter!("allocation_limit_exceeded_total").increment(1);
                tracing::debug!(limit, "per-requester limit reached");
                return Err(AllocationError::LimitExceeded {
                    resource_id: resource_id.clone(),
                    requester_id: requester_id.clone(),
                    limit,
                });
            }
            ClaimOutcome::NotOpen => {
                return Err(AllocationError::ResourceNotOpen(resource_id.clone()));
            }
        };

        let record = AllocationRecord::new(requester_id.clone(), resource_id.clone(), quantity);
        if let Err(err) = self.repository.insert(&record).await {
            tracing::warn!(error = %err, "allocation record write failed, rolling back claim");
            if let Err(rollback_err) = self
                .arbitration
                .rollback(resource_id, requester_id, quantity)
                .await
            {
                metrics::counter!("allocation_orphaned_claims_total").increment(1);
                tracing::error!(
                    error = %rollback_err,
                    quantity,
                    "claim rollback failed, arbitration and records disagree"
                );
            }
            return Err(err);
        }

        metrics::counter!("allocation_granted_total").increment(1);
        tracing::info!(allocation_id = %record.id, quantity, remaining, "allocation granted");

        Ok(Allocation { record, remaining })
    }

    /// Like [`allocate`](Self::allocate), but only while `window` is open at `now`.
    pub async fn allocate_in_window(
        &self,
        window: &SaleWindow,
        now: DateTime<Utc>,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
        limit: u32,
    ) -> Result<Allocation> {
        window.ensure_open(now)?;
        self.allocate(resource_id, requester_id, quantity, limit)
            .await
    }

    /// Cancels an allocation and returns its units to the pool.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, allocation_id: Uuid) -> Result<AllocationRecord> {
        let record = self.repository.cancel(allocation_id, Utc::now()).await?;

        if let Err(err) = self
            .arbitration
            .rollback(&record.resource_id, &record.requester_id, record.quantity)
            .await
        {
            metrics::counter!("allocation_orphaned_claims_total").increment(1);
            tracing::error!(
                %allocation_id,
                error = %err,
                "allocation cancelled but units were not returned"
            );
            return Err(err);
        }

        metrics::counter!("allocation_cancelled_total").increment(1);
        tracing::info!(
            %allocation_id,
            resource_id = %record.resource_id,
            quantity = record.quantity,
            "allocation cancelled"
        );
        Ok(record)
    }

    /// Units left, or `ResourceNotOpen`.
    pub async fn remaining(&self, resource_id: &ResourceId) -> Result<u32> {
        self.arbitration
            .remaining(resource_id)
            .await?
            .ok_or_else(|| AllocationError::ResourceNotOpen(resource_id.clone()))
    }

    pub async fn held_by(&self, resource_id: &ResourceId, requester_id: &RequesterId) -> Result<u32> {
        self.arbitration.claimed_by(resource_id, requester_id).await
    }

    pub async fn allocations_for(&self, requester_id: &RequesterId) -> Result<Vec<AllocationRecord>> {
        self.repository.list_for_requester(requester_id).await
    }
}
