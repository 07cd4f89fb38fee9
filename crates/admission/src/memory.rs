use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::QueueStore;
use crate::{
    EntryStatus, QueueEntry, QueueError, QueueKey, RequesterId, Result, WaitingQueue,
};

#[derive(Debug)]
struct QueueSlot {
    queue: WaitingQueue,
    next_seq: u64,
    /// Arrival sequence → token, lowest first.
    waiting: BTreeMap<u64, Uuid>,
    seq_of: HashMap<Uuid, u64>,
    entered: HashSet<Uuid>,
    latest: HashMap<RequesterId, Uuid>,
    entries: HashMap<Uuid, QueueEntry>,
}

impl QueueSlot {
    fn new(queue: WaitingQueue) -> Self {
        Self {
            queue,
            next_seq: 0,
            waiting: BTreeMap::new(),
            seq_of: HashMap::new(),
            entered: HashSet::new(),
            latest: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn expire(&mut self, token: Uuid, now: DateTime<Utc>) -> Option<QueueEntry> {
        let entry = self.entries.get_mut(&token)?;
        if entry.status.is_live() {
            if let Some(seq) = self.seq_of.remove(&token) {
                self.waiting.remove(&seq);
            }
            self.entered.remove(&token);
            entry.expire(now);
        }
        Some(entry.clone())
    }

    fn purge_expired_before(&mut self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        let purged: Vec<Uuid> = self
            .entries
            .values()
            .filter(|entry| entry.status == EntryStatus::Expired)
            .filter(|entry| entry.expired_at.is_some_and(|at| at < cutoff))
            .map(|entry| entry.token)
            .collect();

        for token in &purged {
            if let Some(entry) = self.entries.remove(token) {
                if self.latest.get(&entry.requester_id) == Some(token) {
                    self.latest.remove(&entry.requester_id);
                }
            }
        }
        purged
    }
}

#[derive(Debug, Default)]
struct InMemoryQueueState {
    queues: HashMap<QueueKey, QueueSlot>,
    tokens: HashMap<Uuid, QueueKey>,
    failing: HashSet<QueueKey>,
}

/// In-memory queue store for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueStore {
    state: Arc<Mutex<InMemoryQueueState>>,
}

impl InMemoryQueueStore {
    /// Creates a new empty in-memory queue store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures promotion of one queue to fail as if the store were
    /// unreachable.
    pub async fn set_fail_on_promote(&self, key: &QueueKey, fail: bool) {
        let mut state = self.state.lock().await;
        if fail {
            state.failing.insert(key.clone());
        } else {
            state.failing.remove(key);
        }
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn save_queue(&self, queue: &WaitingQueue) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.queues.get_mut(&queue.key) {
            Some(slot) => slot.queue = queue.clone(),
            None => {
                state
                    .queues
                    .insert(queue.key.clone(), QueueSlot::new(queue.clone()));
            }
        }
        Ok(())
    }

    async fn get_queue(&self, key: &QueueKey) -> Result<Option<WaitingQueue>> {
        let state = self.state.lock().await;
        Ok(state.queues.get(key).map(|slot| slot.queue.clone()))
    }

    async fn active_queues(&self) -> Result<Vec<WaitingQueue>> {
        let state = self.state.lock().await;
        let mut queues: Vec<_> = state
            .queues
            .values()
            .filter(|slot| slot.queue.active)
            .map(|slot| slot.queue.clone())
            .collect();
        queues.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(queues)
    }

    async fn clear_entries(&self, key: &QueueKey) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(slot) = state.queues.get_mut(key) else {
            return Ok(());
        };
        let tokens: Vec<Uuid> = slot.entries.keys().copied().collect();
        *slot = QueueSlot::new(slot.queue.clone());
        for token in tokens {
            state.tokens.remove(&token);
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let mut state = self.state.lock().await;
        let slot = state
            .queues
            .get_mut(key)
            .ok_or_else(|| QueueError::QueueNotFound(key.clone()))?;

        if let Some(existing) = slot
            .latest
            .get(requester_id)
            .and_then(|token| slot.entries.get(token))
            .filter(|entry| entry.status.is_live())
        {
            return Ok(existing.clone());
        }

        let entry = QueueEntry::new(key.clone(), requester_id.clone(), now);
        let seq = slot.next_seq;
        slot.next_seq += 1;
        slot.waiting.insert(seq, entry.token);
        slot.seq_of.insert(entry.token, seq);
        slot.latest.insert(requester_id.clone(), entry.token);
        slot.entries.insert(entry.token, entry.clone());
        state.tokens.insert(entry.token, key.clone());
        Ok(entry)
    }

    async fn entry_for(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
    ) -> Result<Option<QueueEntry>> {
        let state = self.state.lock().await;
        Ok(state.queues.get(key).and_then(|slot| {
            slot.latest
                .get(requester_id)
                .and_then(|token| slot.entries.get(token))
                .cloned()
        }))
    }

    async fn entry_by_token(&self, token: Uuid) -> Result<Option<QueueEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .get(&token)
            .and_then(|key| state.queues.get(key))
            .and_then(|slot| slot.entries.get(&token))
            .cloned())
    }

    async fn rank(&self, key: &QueueKey, token: Uuid) -> Result<Option<u64>> {
        let state = self.state.lock().await;
        Ok(state.queues.get(key).and_then(|slot| {
            let seq = *slot.seq_of.get(&token)?;
            Some(slot.waiting.range(..seq).count() as u64)
        }))
    }

    async fn waiting_count(&self, key: &QueueKey) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(key)
            .map_or(0, |slot| slot.waiting.len() as u64))
    }

    async fn entered_count(&self, key: &QueueKey) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .queues
            .get(key)
            .map_or(0, |slot| slot.entered.len() as u64))
    }

    async fn expire(
        &self,
        key: &QueueKey,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let mut state = self.state.lock().await;
        Ok(state
            .queues
            .get_mut(key)
            .and_then(|slot| slot.expire(token, now)))
    }

    async fn promote(
        &self,
        key: &QueueKey,
        max_capacity: u32,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        let mut state = self.state.lock().await;
        if state.failing.contains(key) {
            return Err(QueueError::Unavailable(format!(
                "promotion of {key} rejected by test toggle"
            )));
        }
        let Some(slot) = state.queues.get_mut(key) else {
            return Ok(Vec::new());
        };

        let slots = (max_capacity as usize).saturating_sub(slot.entered.len());
        let take = slots.min(batch_size as usize);

        let mut promoted = Vec::with_capacity(take);
        while promoted.len() < take {
            let Some((_, token)) = slot.waiting.pop_first() else {
                break;
            };
            slot.seq_of.remove(&token);
            slot.entered.insert(token);
            if let Some(entry) = slot.entries.get_mut(&token) {
                entry.enter(now);
                promoted.push(entry.clone());
            }
        }
        Ok(promoted)
    }

    async fn expire_entered_before(
        &self,
        key: &QueueKey,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        let mut state = self.state.lock().await;
        let Some(slot) = state.queues.get_mut(key) else {
            return Ok(Vec::new());
        };

        let stale: Vec<Uuid> = slot
            .entered
            .iter()
            .filter(|token| {
                slot.entries
                    .get(*token)
                    .and_then(|entry| entry.entered_at)
                    .is_some_and(|at| at < cutoff)
            })
            .copied()
            .collect();

        Ok(stale
            .into_iter()
            .filter_map(|token| slot.expire(token, now))
            .collect())
    }

    async fn purge_expired_before(&self, key: &QueueKey, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let Some(slot) = state.queues.get_mut(key) else {
            return Ok(0);
        };
        let purged = slot.purge_expired_before(cutoff);
        for token in &purged {
            state.tokens.remove(token);
        }
        Ok(purged.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueConfig;
    use chrono::Duration;

    async fn store_with_queue(key: &QueueKey) -> InMemoryQueueStore {
        let store = InMemoryQueueStore::new();
        let mut queue = WaitingQueue::new(key.clone(), QueueConfig::default());
        queue.activate(Utc::now());
        store.save_queue(&queue).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_for_live_entries() {
        let key = QueueKey::new("TIMEDEAL", "1");
        let store = store_with_queue(&key).await;
        let user = RequesterId::new("user-1");

        let first = store.enqueue(&key, &user, Utc::now()).await.unwrap();
        let second = store.enqueue(&key, &user, Utc::now()).await.unwrap();

        assert_eq!(first.token, second.token);
        assert_eq!(store.waiting_count(&key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_requester_gets_fresh_entry_at_the_back() {
        let key = QueueKey::new("TIMEDEAL", "1");
        let store = store_with_queue(&key).await;
        let a = RequesterId::new("a");
        let b = RequesterId::new("b");

        let first = store.enqueue(&key, &a, Utc::now()).await.unwrap();
        store.enqueue(&key, &b, Utc::now()).await.unwrap();
        store.expire(&key, first.token, Utc::now()).await.unwrap();

        let again = store.enqueue(&key, &a, Utc::now()).await.unwrap();
        assert_ne!(again.token, first.token);
        assert_eq!(store.rank(&key, again.token).await.unwrap(), Some(1));

        let old = store.entry_by_token(first.token).await.unwrap().unwrap();
        assert_eq!(old.status, EntryStatus::Expired);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_queue() {
        let store = InMemoryQueueStore::new();
        let result = store
            .enqueue(&QueueKey::new("X", "1"), &RequesterId::new("a"), Utc::now())
            .await;
        assert!(matches!(result, Err(QueueError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_promote_respects_capacity_and_order() {
        let key = QueueKey::new("TIMEDEAL", "1");
        let store = store_with_queue(&key).await;
        let mut tokens = Vec::new();
        for n in 0..5 {
            let entry = store
                .enqueue(&key, &RequesterId::new(format!("u{n}")), Utc::now())
                .await
                .unwrap();
            tokens.push(entry.token);
        }

        let promoted = store.promote(&key, 3, 2, Utc::now()).await.unwrap();
        assert_eq!(
            promoted.iter().map(|e| e.token).collect::<Vec<_>>(),
            tokens[..2]
        );

        // Only one slot left under a capacity of 3.
        let promoted = store.promote(&key, 3, 2, Utc::now()).await.unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].token, tokens[2]);

        assert!(store.promote(&key, 3, 2, Utc::now()).await.unwrap().is_empty());
        assert_eq!(store.entered_count(&key).await.unwrap(), 3);
        assert_eq!(store.rank(&key, tokens[4]).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_expire_entered_before_cutoff() {
        let key = QueueKey::new("TIMEDEAL", "1");
        let store = store_with_queue(&key).await;
        let now = Utc::now();
        store.enqueue(&key, &RequesterId::new("a"), now).await.unwrap();
        store
            .promote(&key, 10, 10, now - Duration::seconds(60))
            .await
            .unwrap();
        store.enqueue(&key, &RequesterId::new("b"), now).await.unwrap();
        store.promote(&key, 10, 10, now).await.unwrap();

        let expired = store
            .expire_entered_before(&key, now - Duration::seconds(30), now)
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].requester_id, RequesterId::new("a"));
        assert_eq!(store.entered_count(&key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_drops_only_old_expired_entries() {
        let key = QueueKey::new("TIMEDEAL", "1");
        let store = store_with_queue(&key).await;
        let now = Utc::now();
        let (a, b, c) = (RequesterId::new("a"), RequesterId::new("b"), RequesterId::new("c"));

        let old = store.enqueue(&key, &a, now).await.unwrap();
        store
            .expire(&key, old.token, now - Duration::seconds(600))
            .await
            .unwrap();
        let recent = store.enqueue(&key, &b, now).await.unwrap();
        store.expire(&key, recent.token, now).await.unwrap();
        let waiting = store.enqueue(&key, &c, now).await.unwrap();

        let purged = store
            .purge_expired_before(&key, now - Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(purged, 1);

        assert!(store.entry_by_token(old.token).await.unwrap().is_none());
        assert!(store.entry_for(&key, &a).await.unwrap().is_none());
        assert_eq!(
            store.entry_by_token(recent.token).await.unwrap().unwrap().status,
            EntryStatus::Expired
        );
        assert_eq!(store.rank(&key, waiting.token).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_purge_keeps_requesters_fresh_entry() {
        let key = QueueKey::new("TIMEDEAL", "1");
        let store = store_with_queue(&key).await;
        let now = Utc::now();
        let a = RequesterId::new("a");

        let first = store.enqueue(&key, &a, now).await.unwrap();
        store
            .expire(&key, first.token, now - Duration::seconds(600))
            .await
            .unwrap();
        let again = store.enqueue(&key, &a, now).await.unwrap();

        store
            .purge_expired_before(&key, now - Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(
            store.entry_for(&key, &a).await.unwrap().map(|e| e.token),
            Some(again.token)
        );
    }

    #[tokio::test]
    async fn test_clear_entries_forgets_tokens() {
        let key = QueueKey::new("TIMEDEAL", "1");
        let store = store_with_queue(&key).await;
        let entry = store
            .enqueue(&key, &RequesterId::new("a"), Utc::now())
            .await
            .unwrap();

        store.clear_entries(&key).await.unwrap();

        assert!(store.entry_by_token(entry.token).await.unwrap().is_none());
        assert_eq!(store.waiting_count(&key).await.unwrap(), 0);
        assert!(store.get_queue(&key).await.unwrap().is_some());
    }
}
