use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{EntryStatus, QueueEntry, QueueKey, RequesterId, Result, WaitingQueue};

/// Storage for queues and their entries.
///
/// `enqueue`, `expire`, `promote`, `expire_entered_before` and
/// `purge_expired_before` must each be atomic with respect to concurrent
/// callers on the same queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Creates or replaces the queue definition. Entries are untouched.
    async fn save_queue(&self, queue: &WaitingQueue) -> Result<()>;

    async fn get_queue(&self, key: &QueueKey) -> Result<Option<WaitingQueue>>;

    async fn active_queues(&self) -> Result<Vec<WaitingQueue>>;

    /// Drops every entry of the queue, waiting and entered alike.
    async fn clear_entries(&self, key: &QueueKey) -> Result<()>;

    /// Returns the requester's live entry, or appends a new `WAITING` entry
    /// at the back of the queue.
    async fn enqueue(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry>;

    /// The requester's most recent entry, live or not.
    async fn entry_for(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
    ) -> Result<Option<QueueEntry>>;

    async fn entry_by_token(&self, token: Uuid) -> Result<Option<QueueEntry>>;

    /// 0-based rank of a waiting entry, `None` if it is not waiting.
    async fn rank(&self, key: &QueueKey, token: Uuid) -> Result<Option<u64>>;

    async fn waiting_count(&self, key: &QueueKey) -> Result<u64>;

    async fn entered_count(&self, key: &QueueKey) -> Result<u64>;

    /// Removes the entry from the waiting line or its entered slot and marks
    /// it `EXPIRED`. Expiring an expired entry is a no-op.
    async fn expire(
        &self,
        key: &QueueKey,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>>;

    /// Moves up to `min(batch_size, max_capacity - entered)` lowest-rank
    /// waiting entries to `ENTERED`.
    async fn promote(
        &self,
        key: &QueueKey,
        max_capacity: u32,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>>;

    /// Expires entered entries admitted before `cutoff`.
    async fn expire_entered_before(
        &self,
        key: &QueueKey,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>>;

    /// Deletes `EXPIRED` entries that expired before `cutoff`, along with
    /// their token lookups. Returns how many were deleted.
    async fn purge_expired_before(&self, key: &QueueKey, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Extension trait for QueueStore with convenience methods.
#[async_trait]
pub trait QueueStoreExt: QueueStore {
    /// True if the requester currently holds an entered slot.
    async fn is_entered(&self, key: &QueueKey, requester_id: &RequesterId) -> Result<bool> {
        Ok(self
            .entry_for(key, requester_id)
            .await?
            .is_some_and(|entry| entry.status == EntryStatus::Entered))
    }

    /// The queue, only if it is currently active.
    async fn active_queue(&self, key: &QueueKey) -> Result<Option<WaitingQueue>> {
        Ok(self.get_queue(key).await?.filter(|queue| queue.active))
    }
}

// Blanket implementation for all QueueStore implementations
impl<T: QueueStore + ?Sized> QueueStoreExt for T {}

#[async_trait]
impl<T: QueueStore + ?Sized> QueueStore for Arc<T> {
    async fn save_queue(&self, queue: &WaitingQueue) -> Result<()> {
        (**self).save_queue(queue).await
    }

    async fn get_queue(&self, key: &QueueKey) -> Result<Option<WaitingQueue>> {
        (**self).get_queue(key).await
    }

    async fn active_queues(&self) -> Result<Vec<WaitingQueue>> {
        (**self).active_queues().await
    }

    async fn clear_entries(&self, key: &QueueKey) -> Result<()> {
        (**self).clear_entries(key).await
    }

    async fn enqueue(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        (**self).enqueue(key, requester_id, now).await
    }

    async fn entry_for(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
    ) -> Result<Option<QueueEntry>> {
        (**self).entry_for(key, requester_id).await
    }

    async fn entry_by_token(&self, token: Uuid) -> Result<Option<QueueEntry>> {
        (**self).entry_by_token(token).await
    }

    async fn rank(&self, key: &QueueKey, token: Uuid) -> Result<Option<u64>> {
        (**self).rank(key, token).await
    }

    async fn waiting_count(&self, key: &QueueKey) -> Result<u64> {
        (**self).waiting_count(key).await
    }

    async fn entered_count(&self, key: &QueueKey) -> Result<u64> {
        (**self).entered_count(key).await
    }

    async fn expire(
        &self,
        key: &QueueKey,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        (**self).expire(key, token, now).await
    }

    async fn promote(
        &self,
        key: &QueueKey,
        max_capacity: u32,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        (**self).promote(key, max_capacity, batch_size, now).await
    }

    async fn expire_entered_before(
        &self,
        key: &QueueKey,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        (**self).expire_entered_before(key, cutoff, now).await
    }

    async fn purge_expired_before(&self, key: &QueueKey, cutoff: DateTime<Utc>) -> Result<u64> {
        (**self).purge_expired_before(key, cutoff).await
    }
}
