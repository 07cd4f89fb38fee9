use std::sync::Arc;

use async_trait::async_trait;

use crate::{RequesterId, ResourceId, Result};

/// Outcome of one arbitration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Units granted; `remaining` is what is left after this claim.
    Granted { remaining: u32 },
    SoldOut,
    LimitExceeded,
    /// The resource has no arbitration state.
    NotOpen,
}

/// The single shared point where concurrent claims are decided.
///
/// `try_claim` must check stock, check the requester's cap, and decrement
/// both counters as one indivisible step visible to every instance.
#[async_trait]
pub trait ArbitrationStore: Send + Sync {
    /// Sets the number of units available for `resource_id`.
    ///
    /// Fails with `ResourceAlreadyOpen` while the resource is open, so units
    /// already granted are never handed out again.
    async fn open(&self, resource_id: &ResourceId, total: u32) -> Result<()>;

    /// Drops all arbitration state for `resource_id`.
    async fn close(&self, resource_id: &ResourceId) -> Result<()>;

    /// Attempts to claim `quantity` units for `requester_id`, who may hold at
    /// most `limit` units in total. Stock is checked before the cap.
    async fn try_claim(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
        limit: u32,
    ) -> Result<ClaimOutcome>;

    /// Returns `quantity` units claimed by `requester_id`.
    async fn rollback(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
    ) -> Result<()>;

    /// Units left, or `None` if the resource is not open.
    async fn remaining(&self, resource_id: &ResourceId) -> Result<Option<u32>>;

    /// Units currently held by `requester_id`.
    async fn claimed_by(&self, resource_id: &ResourceId, requester_id: &RequesterId)
    -> Result<u32>;
}

#[async_trait]
impl<T: ArbitrationStore + ?Sized> ArbitrationStore for Arc<T> {
    async fn open(&self, resource_id: &ResourceId, total: u32) -> Result<()> {
        (**self).open(resource_id, total).await
    }

    async fn close(&self, resource_id: &ResourceId) -> Result<()> {
        (**self).close(resource_id).await
    }

    async fn try_claim(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
        limit: u32,
    ) -> Result<ClaimOutcome> {
        (**self)
            .try_claim(resource_id, requester_id, quantity, limit)
            .await
    }

    async fn rollback(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
    ) -> Result<()> {
        (**self).rollback(resource_id, requester_id, quantity).await
    }

    async fn remaining(&self, resource_id: &ResourceId) -> Result<Option<u32>> {
        (**self).remaining(resource_id).await
    }

    async fn claimed_by(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
    ) -> Result<u32> {
        (**self).claimed_by(resource_id, requester_id).await
    }
}
