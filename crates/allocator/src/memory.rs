use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::arbitration::{ArbitrationStore, ClaimOutcome};
use crate::{AllocationError, RequesterId, ResourceId, Result};

#[derive(Debug, Default)]
struct Pool {
    remaining: u32,
    claimed: HashMap<RequesterId, u32>,
}

/// In-process arbitration for single-instance deployments and tests.
///
/// Every claim runs inside one mutex critical section, which gives the same
/// guarantee as the Redis script within a single process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArbitrationStore {
    pools: Arc<Mutex<HashMap<ResourceId, Pool>>>,
}

impl InMemoryArbitrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArbitrationStore for InMemoryArbitrationStore {
    async fn open(&self, resource_id: &ResourceId, total: u32) -> Result<()> {
        let mut pools = self.pools.lock().await;
        match pools.entry(resource_id.clone()) {
            Entry::Occupied(_) => {
                Err(AllocationError::ResourceAlreadyOpen(resource_id.clone()))
            }
            Entry::Vacant(slot) => {
                slot.insert(Pool {
                    remaining: total,
                    claimed: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn close(&self, resource_id: &ResourceId) -> Result<()> {
        self.pools.lock().await.remove(resource_id);
        Ok(())
    }

    async fn try_claim(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
        limit: u32,
    ) -> Result<ClaimOutcome> {
        let mut pools = self.pools.lock().await;
        let Some(pool) = pools.get_mut(resource_id) else {
            return Ok(ClaimOutcome::NotOpen);
        };

        if pool.remaining < quantity {
            return Ok(ClaimOutcome::SoldOut);
        }

        let held = pool.claimed.get(requester_id).copied().unwrap_or(0);
        if held.saturating_add(quantity) > limit {
            return Ok(ClaimOutcome::LimitExceeded);
        }

        pool.remaining -= quantity;
        pool.claimed.insert(requester_id.clone(), held + quantity);
        Ok(ClaimOutcome::Granted {
            remaining: pool.remaining,
        })
    }

    async fn rollback(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
    ) -> Result<()> {
        let mut pools = self.pools.lock().await;
        let Some(pool) = pools.get_mut(resource_id) else {
            return Ok(());
        };

        pool.remaining = pool.remaining.saturating_add(quantity);
        let held = pool.claimed.get(requester_id).copied().unwrap_or(0);
        match held.saturating_sub(quantity) {
            0 => pool.claimed.remove(requester_id),
            left => pool.claimed.insert(requester_id.clone(), left),
        };
        Ok(())
    }

    async fn remaining(&self, resource_id: &ResourceId) -> Result<Option<u32>> {
        Ok(self
            .pools
            .lock()
            .await
            .get(resource_id)
            .map(|pool| pool.remaining))
    }

    async fn claimed_by(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
    ) -> Result<u32> {
        Ok(self
            .pools
            .lock()
            .await
            .get(resource_id)
            .and_then(|pool| pool.claimed.get(requester_id).copied())
            .unwrap_or(0))
    }
}
