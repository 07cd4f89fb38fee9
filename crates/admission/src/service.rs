use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::store::{QueueStore, QueueStoreExt};
use crate::{
    EntryStatus, QueueConfig, QueueEntry, QueueError, QueueKey, QueuePosition, RequesterId,
    Result, WaitingQueue,
};

/// Seconds an `EXPIRED` entry stays readable by token before
/// [`AdmissionQueue::process_entries`] deletes it.
pub const DEFAULT_EXPIRED_RETENTION_SECS: i64 = 600;

/// Admission queue operations over a [`QueueStore`].
#[derive(Debug, Clone)]
pub struct AdmissionQueue<S: QueueStore> {
    store: S,
    expired_retention: Duration,
}

impl<S: QueueStore> AdmissionQueue<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            expired_retention: Duration::seconds(DEFAULT_EXPIRED_RETENTION_SECS),
        }
    }

    pub fn with_expired_retention(mut self, retention: Duration) -> Self {
        self.expired_retention = retention;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opts an event into queueing, or updates the config of an active queue.
    #[tracing::instrument(skip(self), fields(queue = %key))]
    pub async fn activate(&self, key: &QueueKey, config: QueueConfig) -> Result<WaitingQueue> {
        config.validate()?;

        let mut queue = match self.store.get_queue(key).await? {
            Some(mut existing) => {
                existing.config = config;
                existing
            }
            None => WaitingQueue::new(key.clone(), config),
        };
        if !queue.active {
            queue.activate(Utc::now());
        }
        self.store.save_queue(&queue).await?;

        tracing::info!(
            max_capacity = config.max_capacity,
            batch = config.entry_batch_size,
            interval_secs = config.entry_interval_secs,
            "queue activated"
        );
        Ok(queue)
    }

    /// Stops gating the event and drops every entry.
    #[tracing::instrument(skip(self), fields(queue = %key))]
    pub async fn deactivate(&self, key: &QueueKey) -> Result<WaitingQueue> {
        let mut queue = self
            .store
            .active_queue(key)
            .await?
            .ok_or_else(|| QueueError::QueueNotFound(key.clone()))?;

        queue.deactivate(Utc::now());
        self.store.save_queue(&queue).await?;
        self.store.clear_entries(key).await?;

        tracing::info!("queue deactivated");
        Ok(queue)
    }

    /// Joins the queue. A requester already waiting or entered gets that
    /// entry back.
    #[tracing::instrument(skip(self, key, requester_id), fields(queue = %key, %requester_id))]
    pub async fn enter_queue(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
    ) -> Result<QueuePosition> {
        let queue = self
            .store
            .active_queue(key)
            .await?
            .ok_or_else(|| QueueError::QueueNotFound(key.clone()))?;

        let entry = self.store.enqueue(key, requester_id, Utc::now()).await?;
        metrics::counter!("queue_entries_total").increment(1);

        let position = self.position_of(&queue.config, &entry).await?;
        tracing::debug!(
            token = %entry.token,
            status = %entry.status,
            position = ?position.position,
            "queue entered"
        );
        Ok(position)
    }

    pub async fn get_status(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
    ) -> Result<QueuePosition> {
        let entry = self
            .store
            .entry_for(key, requester_id)
            .await?
            .ok_or_else(|| QueueError::EntryNotFound {
                key: key.clone(),
                requester_id: requester_id.clone(),
            })?;
        let config = self.config_of(key).await?;
        self.position_of(&config, &entry).await
    }

    pub async fn get_status_by_token(&self, token: Uuid) -> Result<QueuePosition> {
        let entry = self
            .store
            .entry_by_token(token)
            .await?
            .ok_or(QueueError::TokenNotFound(token))?;
        let config = self.config_of(&entry.key).await?;
        self.position_of(&config, &entry).await
    }

    /// Gives up a waiting place or an entered slot.
    #[tracing::instrument(skip(self, key, requester_id), fields(queue = %key, %requester_id))]
    pub async fn leave_queue(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
    ) -> Result<QueueEntry> {
        let entry = self
            .store
            .entry_for(key, requester_id)
            .await?
            .ok_or_else(|| QueueError::EntryNotFound {
                key: key.clone(),
                requester_id: requester_id.clone(),
            })?;
        self.leave(entry).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn leave_by_token(&self, token: Uuid) -> Result<QueueEntry> {
        let entry = self
            .store
            .entry_by_token(token)
            .await?
            .ok_or(QueueError::TokenNotFound(token))?;
        self.leave(entry).await
    }

    /// Expires stale entered slots, then promotes the next batch of waiting
    /// entries. Does nothing for an inactive queue.
    #[tracing::instrument(skip(self), fields(queue = %key))]
    pub async fn process_entries(&self, key: &QueueKey) -> Result<Vec<QueueEntry>> {
        let Some(queue) = self.store.active_queue(key).await? else {
            return Ok(Vec::new());
        };
        let config = queue.config;
        let now = Utc::now();

        if let Some(ttl) = config.entry_ttl_secs {
            let cutoff = i64::try_from(ttl)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|ttl| now.checked_sub_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let expired = self.store.expire_entered_before(key, cutoff, now).await?;
            if !expired.is_empty() {
                metrics::counter!("queue_expired_total").increment(expired.len() as u64);
                tracing::debug!(expired = expired.len(), "stale entered slots expired");
            }
        }

        let promoted = self
            .store
            .promote(key, config.max_capacity, config.entry_batch_size, now)
            .await?;
        if !promoted.is_empty() {
            metrics::counter!("queue_promoted_total").increment(promoted.len() as u64);
            tracing::info!(promoted = promoted.len(), "waiting entries promoted");
        }

        let cutoff = now
            .checked_sub_signed(self.expired_retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let purged = self.store.purge_expired_before(key, cutoff).await?;
        if purged > 0 {
            metrics::counter!("queue_purged_total").increment(purged);
            tracing::debug!(purged, "expired entries purged");
        }
        Ok(promoted)
    }

    /// True if the event is not gated, or the requester holds an entered slot.
    pub async fn validate_entry(&self, key: &QueueKey, requester_id: &RequesterId) -> Result<bool> {
        if self.store.active_queue(key).await?.is_none() {
            return Ok(true);
        }
        self.store.is_entered(key, requester_id).await
    }

    pub async fn get_queue(&self, key: &QueueKey) -> Result<WaitingQueue> {
        self.store
            .get_queue(key)
            .await?
            .ok_or_else(|| QueueError::QueueNotFound(key.clone()))
    }

    pub async fn active_queues(&self) -> Result<Vec<WaitingQueue>> {
        self.store.active_queues().await
    }

    async fn leave(&self, entry: QueueEntry) -> Result<QueueEntry> {
        let left = self
            .store
            .expire(&entry.key, entry.token, Utc::now())
            .await?
            .ok_or(QueueError::TokenNotFound(entry.token))?;
        tracing::debug!(token = %left.token, "queue left");
        Ok(left)
    }

    async fn config_of(&self, key: &QueueKey) -> Result<QueueConfig> {
        Ok(self.get_queue(key).await?.config)
    }

    async fn position_of(&self, config: &QueueConfig, entry: &QueueEntry) -> Result<QueuePosition> {
        let total_waiting = self.store.waiting_count(&entry.key).await?;

        let position = match entry.status {
            EntryStatus::Waiting => self
                .store
                .rank(&entry.key, entry.token)
                .await?
                .map(|rank| rank + 1),
            EntryStatus::Entered | EntryStatus::Expired => None,
        };

        Ok(QueuePosition {
            token: entry.token,
            status: entry.status,
            position,
            total_waiting,
            estimated_wait_secs: position.map(|p| config.estimated_wait_secs(p)),
        })
    }
}
