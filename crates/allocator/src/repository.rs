//! Durable allocation records.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{AllocationError, RequesterId, ResourceId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Active,
    Cancelled,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Active => "ACTIVE",
            AllocationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(AllocationStatus::Active),
            "CANCELLED" => Some(AllocationStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Units granted to one requester by one successful arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub id: Uuid,
    pub requester_id: RequesterId,
    pub resource_id: ResourceId,
    pub quantity: u32,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl AllocationRecord {
    pub fn new(requester_id: RequesterId, resource_id: ResourceId, quantity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester_id,
            resource_id,
            quantity,
            status: AllocationStatus::Active,
            allocated_at: Utc::now(),
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }
}

/// Storage for allocation records.
#[async_trait]
pub trait AllocationRepository: Send + Sync {
    async fn insert(&self, record: &AllocationRecord) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<AllocationRecord>>;

    /// Flips an active record to cancelled.
    ///
    /// Fails with `AlreadyCancelled` if it was cancelled before, so that two
    /// racing cancellations cannot both return units.
    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> Result<AllocationRecord>;

    /// All records for a requester, newest first.
    async fn list_for_requester(&self, requester_id: &RequesterId)
    -> Result<Vec<AllocationRecord>>;
}

#[async_trait]
impl<T: AllocationRepository + ?Sized> AllocationRepository for Arc<T> {
    async fn insert(&self, record: &AllocationRecord) -> Result<()> {
        (**self).insert(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<AllocationRecord>> {
        (**self).get(id).await
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> Result<AllocationRecord> {
        (**self).cancel(id, at).await
    }

    async fn list_for_requester(
        &self,
        requester_id: &RequesterId,
    ) -> Result<Vec<AllocationRecord>> {
        (**self).list_for_requester(requester_id).await
    }
}

/// In-memory allocation repository for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAllocationRepository {
    records: Arc<RwLock<HashMap<Uuid, AllocationRecord>>>,
    fail_on_insert: Arc<AtomicBool>,
}

impl InMemoryAllocationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures inserts to fail as if the database were unreachable.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored records.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl AllocationRepository for InMemoryAllocationRepository {
    async fn insert(&self, record: &AllocationRecord) -> Result<()> {
        if self.fail_on_insert.load(Ordering::SeqCst) {
            return Err(AllocationError::Unavailable(
                "allocation insert rejected by test toggle".to_string(),
            ));
        }
        self.records
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AllocationRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> Result<AllocationRecord> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(AllocationError::AllocationNotFound(id))?;
        if !record.is_active() {
            return Err(AllocationError::AlreadyCancelled(id));
        }
        record.status = AllocationStatus::Cancelled;
        record.cancelled_at = Some(at);
        Ok(record.clone())
    }

    async fn list_for_requester(
        &self,
        requester_id: &RequesterId,
    ) -> Result<Vec<AllocationRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| &r.requester_id == requester_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.allocated_at.cmp(&a.allocated_at));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_twice_fails() {
        let repo = InMemoryAllocationRepository::new();
        let record = AllocationRecord::new(RequesterId::new("u1"), ResourceId::new("C-1"), 1);
        repo.insert(&record).await.unwrap();

        let cancelled = repo.cancel(record.id, Utc::now()).await.unwrap();
        assert_eq!(cancelled.status, AllocationStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        assert!(matches!(
            repo.cancel(record.id, Utc::now()).await,
            Err(AllocationError::AlreadyCancelled(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown() {
        let repo = InMemoryAllocationRepository::new();
        assert!(matches!(
            repo.cancel(Uuid::new_v4(), Utc::now()).await,
            Err(AllocationError::AllocationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_for_requester() {
        let repo = InMemoryAllocationRepository::new();
        let u1 = RequesterId::new("u1");
        repo.insert(&AllocationRecord::new(u1.clone(), ResourceId::new("A"), 1))
            .await
            .unwrap();
        repo.insert(&AllocationRecord::new(u1.clone(), ResourceId::new("B"), 2))
            .await
            .unwrap();
        repo.insert(&AllocationRecord::new(
            RequesterId::new("u2"),
            ResourceId::new("A"),
            1,
        ))
        .await
        .unwrap();

        assert_eq!(repo.list_for_requester(&u1).await.unwrap().len(), 2);
    }
}
