//! Redis-backed queue store.
//!
//! Per queue `{type:id}`:
//! - **Definition**: `queue:{type:id}:meta` → JSON `WaitingQueue`
//! - **Waiting line**: `queue:{type:id}:waiting` (Sorted Set) → token by arrival sequence
//! - **Sequence**: `queue:{type:id}:seq` → last issued arrival sequence
//! - **Entered slots**: `queue:{type:id}:entered` (Sorted Set) → token by entered-at millis
//! - **Latest entry**: `queue:{type:id}:requesters` (Hash) → requester → token
//! - **Entries**: `queue:{type:id}:entry:{token}` (Hash) → entry fields
//! - **Issued tokens**: `queue:{type:id}:tokens` (Set)
//! - **Expired entries**: `queue:{type:id}:expired` (Sorted Set) → token by expired-at millis
//!
//! Global:
//! - **Active queues**: `queue:active` (Set) → JSON `QueueKey`
//! - **Token index**: `queue:tokens` (Hash) → token → JSON `QueueKey`
//!
//! The scripts derive entry keys from a prefix argument and the global keys
//! live outside the per-queue hash slot, so this store targets a single Redis
//! node rather than a cluster.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use uuid::Uuid;

use crate::store::QueueStore;
use crate::{
    EntryStatus, QueueEntry, QueueError, QueueKey, RequesterId, Result, WaitingQueue,
};

const ACTIVE_KEY: &str = "queue:active";
const TOKEN_INDEX_KEY: &str = "queue:tokens";

/// Returns the requester's live token, or the new token after appending it.
const ENQUEUE_SCRIPT: &str = r#"
    local existing = redis.call('HGET', KEYS[1], ARGV[1])
    if existing then
        local status = redis.call('HGET', ARGV[4] .. existing, 'status')
        if status == 'WAITING' or status == 'ENTERED' then
            return existing
        end
    end

    local seq = redis.call('INCR', KEYS[3])
    redis.call('ZADD', KEYS[2], seq, ARGV[2])
    redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
    redis.call('SADD', KEYS[4], ARGV[2])
    redis.call('HSET', ARGV[4] .. ARGV[2],
        'requester_id', ARGV[1],
        'status', 'WAITING',
        'joined_at', ARGV[3])
    return ARGV[2]
"#;

/// Returns 0 if the entry does not exist, 1 otherwise.
const EXPIRE_SCRIPT: &str = r#"
    local status = redis.call('HGET', KEYS[3], 'status')
    if not status then
        return 0
    end
    if status ~= 'EXPIRED' then
        redis.call('ZREM', KEYS[1], ARGV[1])
        redis.call('ZREM', KEYS[2], ARGV[1])
        redis.call('HSET', KEYS[3], 'status', 'EXPIRED', 'expired_at', ARGV[2])
        redis.call('ZADD', KEYS[4], ARGV[2], ARGV[1])
    end
    return 1
"#;

/// Returns the promoted tokens, lowest rank first.
const PROMOTE_SCRIPT: &str = r#"
    local slots = tonumber(ARGV[1]) - redis.call('ZCARD', KEYS[2])
    if slots <= 0 then
        return {}
    end

    local popped = redis.call('ZPOPMIN', KEYS[1], math.min(slots, tonumber(ARGV[2])))
    local promoted = {}
    for i = 1, #popped, 2 do
        local token = popped[i]
        redis.call('ZADD', KEYS[2], ARGV[3], token)
        redis.call('HSET', ARGV[4] .. token, 'status', 'ENTERED', 'entered_at', ARGV[3])
        table.insert(promoted, token)
    end
    return promoted
"#;

/// Returns the expired tokens.
const EXPIRE_STALE_SCRIPT: &str = r#"
    local stale = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
    for _, token in ipairs(stale) do
        redis.call('ZREM', KEYS[1], token)
        redis.call('HSET', ARGV[3] .. token, 'status', 'EXPIRED', 'expired_at', ARGV[2])
        redis.call('ZADD', KEYS[2], ARGV[2], token)
    end
    return stale
"#;

/// Returns the number of entries deleted. The requester's pointer is only
/// dropped while it still names the deleted token.
const PURGE_SCRIPT: &str = r#"
    local purged = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
    for _, token in ipairs(purged) do
        local entry = ARGV[2] .. token
        local requester = redis.call('HGET', entry, 'requester_id')
        if requester and redis.call('HGET', KEYS[2], requester) == token then
            redis.call('HDEL', KEYS[2], requester)
        end
        redis.call('DEL', entry)
        redis.call('SREM', KEYS[3], token)
        redis.call('HDEL', KEYS[4], token)
        redis.call('ZREM', KEYS[1], token)
    end
    return #purged
"#;

/// Returns the number of entries dropped.
const CLEAR_SCRIPT: &str = r#"
    local tokens = redis.call('SMEMBERS', KEYS[5])
    for _, token in ipairs(tokens) do
        redis.call('DEL', ARGV[1] .. token)
        redis.call('HDEL', KEYS[6], token)
    end
    redis.call('DEL', KEYS[1], KEYS[2], KEYS[3], KEYS[4], KEYS[5], KEYS[7])
    return #tokens
"#;

/// Queue store on a shared Redis.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn_manager: ConnectionManager,
    enqueue: Script,
    expire: Script,
    promote: Script,
    expire_stale: Script,
    purge: Script,
    clear: Script,
}

impl RedisQueueStore {
    /// Creates a store on an existing connection manager.
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            enqueue: Script::new(ENQUEUE_SCRIPT),
            expire: Script::new(EXPIRE_SCRIPT),
            promote: Script::new(PROMOTE_SCRIPT),
            expire_stale: Script::new(EXPIRE_STALE_SCRIPT),
            purge: Script::new(PURGE_SCRIPT),
            clear: Script::new(CLEAR_SCRIPT),
        }
    }

    /// Connects to Redis at `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self::new(conn_manager))
    }

    fn queue_key(key: &QueueKey, suffix: &str) -> String {
        format!("queue:{{{key}}}:{suffix}")
    }

    fn entry_prefix(key: &QueueKey) -> String {
        Self::queue_key(key, "entry:")
    }

    fn entry_key(key: &QueueKey, token: Uuid) -> String {
        format!("{}{token}", Self::entry_prefix(key))
    }

    fn parse_token(value: &str) -> Result<Uuid> {
        Uuid::parse_str(value)
            .map_err(|e| QueueError::Corrupt(format!("invalid token {value}: {e}")))
    }

    fn parse_millis(fields: &HashMap<String, String>, name: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = fields.get(name) else {
            return Ok(None);
        };
        let millis: i64 = raw
            .parse()
            .map_err(|_| QueueError::Corrupt(format!("invalid {name}: {raw}")))?;
        DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| QueueError::Corrupt(format!("{name} out of range: {millis}")))
    }

    fn entry_from_fields(
        key: &QueueKey,
        token: Uuid,
        fields: &HashMap<String, String>,
    ) -> Result<QueueEntry> {
        let requester_id = fields
            .get("requester_id")
            .ok_or_else(|| QueueError::Corrupt(format!("entry {token} has no requester")))?;
        let status = fields
            .get("status")
            .and_then(|s| EntryStatus::parse(s))
            .ok_or_else(|| QueueError::Corrupt(format!("entry {token} has no valid status")))?;
        let joined_at = Self::parse_millis(fields, "joined_at")?
            .ok_or_else(|| QueueError::Corrupt(format!("entry {token} has no joined_at")))?;

        Ok(QueueEntry {
            token,
            key: key.clone(),
            requester_id: RequesterId::new(requester_id.as_str()),
            status,
            joined_at,
            entered_at: Self::parse_millis(fields, "entered_at")?,
            expired_at: Self::parse_millis(fields, "expired_at")?,
        })
    }

    async fn load_entry(&self, key: &QueueKey, token: Uuid) -> Result<Option<QueueEntry>> {
        let mut conn = self.conn_manager.clone();
        let fields: HashMap<String, String> = conn.hgetall(Self::entry_key(key, token)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Self::entry_from_fields(key, token, &fields).map(Some)
    }

    async fn load_entries(&self, key: &QueueKey, tokens: Vec<String>) -> Result<Vec<QueueEntry>> {
        let mut entries = Vec::with_capacity(tokens.len());
        for raw in tokens {
            let token = Self::parse_token(&raw)?;
            if let Some(entry) = self.load_entry(key, token).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn save_queue(&self, queue: &WaitingQueue) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let member = serde_json::to_string(&queue.key)?;
        let meta = serde_json::to_string(queue)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(Self::queue_key(&queue.key, "meta"), meta)
            .ignore();
        if queue.active {
            pipe.sadd(ACTIVE_KEY, member).ignore();
        } else {
            pipe.srem(ACTIVE_KEY, member).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn get_queue(&self, key: &QueueKey) -> Result<Option<WaitingQueue>> {
        let mut conn = self.conn_manager.clone();
        let meta: Option<String> = conn.get(Self::queue_key(key, "meta")).await?;
        meta.map(|raw| serde_json::from_str(&raw).map_err(QueueError::from))
            .transpose()
    }

    async fn active_queues(&self) -> Result<Vec<WaitingQueue>> {
        let mut conn = self.conn_manager.clone();
        let members: Vec<String> = conn.smembers(ACTIVE_KEY).await?;

        let mut queues = Vec::with_capacity(members.len());
        for member in members {
            let key: QueueKey = serde_json::from_str(&member)?;
            if let Some(queue) = self.get_queue(&key).await?.filter(|q| q.active) {
                queues.push(queue);
            }
        }
        queues.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(queues)
    }

    async fn clear_entries(&self, key: &QueueKey) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let dropped: i64 = self
            .clear
            .key(Self::queue_key(key, "waiting"))
            .key(Self::queue_key(key, "entered"))
            .key(Self::queue_key(key, "requesters"))
            .key(Self::queue_key(key, "seq"))
            .key(Self::queue_key(key, "tokens"))
            .key(TOKEN_INDEX_KEY)
            .key(Self::queue_key(key, "expired"))
            .arg(Self::entry_prefix(key))
            .invoke_async(&mut conn)
            .await?;
        tracing::debug!(queue = %key, dropped, "queue entries cleared");
        Ok(())
    }

    async fn enqueue(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry> {
        let mut conn = self.conn_manager.clone();
        let candidate = Uuid::new_v4();
        let raw: String = self
            .enqueue
            .key(Self::queue_key(key, "requesters"))
            .key(Self::queue_key(key, "waiting"))
            .key(Self::queue_key(key, "seq"))
            .key(Self::queue_key(key, "tokens"))
            .arg(requester_id.as_str())
            .arg(candidate.to_string())
            .arg(now.timestamp_millis())
            .arg(Self::entry_prefix(key))
            .invoke_async(&mut conn)
            .await?;

        let token = Self::parse_token(&raw)?;
        if token == candidate {
            let _: () = conn
                .hset(TOKEN_INDEX_KEY, token.to_string(), serde_json::to_string(key)?)
                .await?;
        }

        self.load_entry(key, token)
            .await?
            .ok_or_else(|| QueueError::Corrupt(format!("entry {token} vanished after enqueue")))
    }

    async fn entry_for(
        &self,
        key: &QueueKey,
        requester_id: &RequesterId,
    ) -> Result<Option<QueueEntry>> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn
            .hget(Self::queue_key(key, "requesters"), requester_id.as_str())
            .await?;
        match raw {
            Some(raw) => self.load_entry(key, Self::parse_token(&raw)?).await,
            None => Ok(None),
        }
    }

    async fn entry_by_token(&self, token: Uuid) -> Result<Option<QueueEntry>> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn.hget(TOKEN_INDEX_KEY, token.to_string()).await?;
        match raw {
            Some(raw) => {
                let key: QueueKey = serde_json::from_str(&raw)?;
                self.load_entry(&key, token).await
            }
            None => Ok(None),
        }
    }

    async fn rank(&self, key: &QueueKey, token: Uuid) -> Result<Option<u64>> {
        let mut conn = self.conn_manager.clone();
        let rank: Option<u64> = conn
            .zrank(Self::queue_key(key, "waiting"), token.to_string())
            .await?;
        Ok(rank)
    }

    async fn waiting_count(&self, key: &QueueKey) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        let count: u64 = conn.zcard(Self::queue_key(key, "waiting")).await?;
        Ok(count)
    }

    async fn entered_count(&self, key: &QueueKey) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        let count: u64 = conn.zcard(Self::queue_key(key, "entered")).await?;
        Ok(count)
    }

    async fn expire(
        &self,
        key: &QueueKey,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueEntry>> {
        let mut conn = self.conn_manager.clone();
        let found: i64 = self
            .expire
            .key(Self::queue_key(key, "waiting"))
            .key(Self::queue_key(key, "entered"))
            .key(Self::entry_key(key, token))
            .key(Self::queue_key(key, "expired"))
            .arg(token.to_string())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if found == 0 {
            return Ok(None);
        }
        self.load_entry(key, token).await
    }

    async fn promote(
        &self,
        key: &QueueKey,
        max_capacity: u32,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        let mut conn = self.conn_manager.clone();
        let tokens: Vec<String> = self
            .promote
            .key(Self::queue_key(key, "waiting"))
            .key(Self::queue_key(key, "entered"))
            .arg(max_capacity)
            .arg(batch_size)
            .arg(now.timestamp_millis())
            .arg(Self::entry_prefix(key))
            .invoke_async(&mut conn)
            .await?;

        self.load_entries(key, tokens).await
    }

    async fn expire_entered_before(
        &self,
        key: &QueueKey,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>> {
        let mut conn = self.conn_manager.clone();
        let tokens: Vec<String> = self
            .expire_stale
            .key(Self::queue_key(key, "entered"))
            .key(Self::queue_key(key, "expired"))
            .arg(cutoff.timestamp_millis())
            .arg(now.timestamp_millis())
            .arg(Self::entry_prefix(key))
            .invoke_async(&mut conn)
            .await?;

        self.load_entries(key, tokens).await
    }

    async fn purge_expired_before(&self, key: &QueueKey, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        let purged: u64 = self
            .purge
            .key(Self::queue_key(key, "expired"))
            .key(Self::queue_key(key, "requesters"))
            .key(Self::queue_key(key, "tokens"))
            .key(TOKEN_INDEX_KEY)
            .arg(cutoff.timestamp_millis())
            .arg(Self::entry_prefix(key))
            .invoke_async(&mut conn)
            .await?;
        Ok(purged)
    }
}
