//! Redis-backed arbitration.
//!
//! Per resource:
//! - **Stock**: `alloc:{resource}:stock` → remaining units
//! - **Claims**: `alloc:{resource}:claimed` (Hash) → requester → units held
//!
//! Both keys share the `{resource}` hash tag so the scripts stay valid on a
//! Redis Cluster.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use crate::arbitration::{ArbitrationStore, ClaimOutcome};
use crate::{AllocationError, RequesterId, ResourceId, Result};

/// Returns remaining units after the claim (>= 0), or
/// -1 limit exceeded, -2 sold out, -3 not open.
const CLAIM_SCRIPT: &str = r#"
    local stock = redis.call('GET', KEYS[1])
    if not stock then
        return -3
    end
    stock = tonumber(stock)
    local quantity = tonumber(ARGV[2])
    local limit = tonumber(ARGV[3])

    if stock < quantity then
        return -2
    end

    local held = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '0')
    if held + quantity > limit then
        return -1
    end

    redis.call('DECRBY', KEYS[1], quantity)
    redis.call('HINCRBY', KEYS[2], ARGV[1], quantity)
    return stock - quantity
"#;

const ROLLBACK_SCRIPT: &str = r#"
    local quantity = tonumber(ARGV[2])
    if redis.call('EXISTS', KEYS[1]) == 1 then
        redis.call('INCRBY', KEYS[1], quantity)
    end

    local held = tonumber(redis.call('HGET', KEYS[2], ARGV[1]) or '0')
    local left = held - quantity
    if left > 0 then
        redis.call('HSET', KEYS[2], ARGV[1], left)
    else
        redis.call('HDEL', KEYS[2], ARGV[1])
    end
    return left
"#;

/// Arbitration on a shared Redis, safe across any number of instances.
#[derive(Clone)]
pub struct RedisArbitrationStore {
    conn_manager: ConnectionManager,
    claim: Script,
    rollback: Script,
}

impl RedisArbitrationStore {
    /// Creates a store on an existing connection manager.
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            claim: Script::new(CLAIM_SCRIPT),
            rollback: Script::new(ROLLBACK_SCRIPT),
        }
    }

    /// Connects to Redis at `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self::new(conn_manager))
    }

    fn stock_key(resource_id: &ResourceId) -> String {
        format!("alloc:{{{}}}:stock", resource_id)
    }

    fn claimed_key(resource_id: &ResourceId) -> String {
        format!("alloc:{{{}}}:claimed", resource_id)
    }

    fn to_units(value: i64) -> Result<u32> {
        u32::try_from(value)
            .map_err(|_| AllocationError::Unavailable(format!("unexpected counter value {value}")))
    }
}

#[async_trait]
impl ArbitrationStore for RedisArbitrationStore {
    async fn open(&self, resource_id: &ResourceId, total: u32) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        // NX: a live stock key already reflects granted claims.
        let created: bool = conn.set_nx(Self::stock_key(resource_id), total).await?;
        if !created {
            return Err(AllocationError::ResourceAlreadyOpen(resource_id.clone()));
        }
        tracing::info!(%resource_id, total, "arbitration stock opened");
        Ok(())
    }

    async fn close(&self, resource_id: &ResourceId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(vec![Self::stock_key(resource_id), Self::claimed_key(resource_id)])
            .await?;
        Ok(())
    }

    async fn try_claim(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
        limit: u32,
    ) -> Result<ClaimOutcome> {
        let mut conn = self.conn_manager.clone();
        let result: i64 = self
            .claim
            .key(Self::stock_key(resource_id))
            .key(Self::claimed_key(resource_id))
            .arg(requester_id.as_str())
            .arg(quantity)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;

        match result {
            -1 => Ok(ClaimOutcome::LimitExceeded),
            -2 => Ok(ClaimOutcome::SoldOut),
            -3 => Ok(ClaimOutcome::NotOpen),
            remaining => Ok(ClaimOutcome::Granted {
                remaining: Self::to_units(remaining)?,
            }),
        }
    }

    async fn rollback(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
        quantity: u32,
    ) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = self
            .rollback
            .key(Self::stock_key(resource_id))
            .key(Self::claimed_key(resource_id))
            .arg(requester_id.as_str())
            .arg(quantity)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remaining(&self, resource_id: &ResourceId) -> Result<Option<u32>> {
        let mut conn = self.conn_manager.clone();
        let value: Option<i64> = conn.get(Self::stock_key(resource_id)).await?;
        value.map(Self::to_units).transpose()
    }

    async fn claimed_by(
        &self,
        resource_id: &ResourceId,
        requester_id: &RequesterId,
    ) -> Result<u32> {
        let mut conn = self.conn_manager.clone();
        let value: Option<i64> = conn
            .hget(Self::claimed_key(resource_id), requester_id.as_str())
            .await?;
        value.map(Self::to_units).transpose().map(Option::unwrap_or_default)
    }
}
