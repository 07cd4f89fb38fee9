use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::repository::{AllocationRecord, AllocationRepository, AllocationStatus};
use crate::{AllocationError, RequesterId, ResourceId, Result};

/// PostgreSQL-backed allocation repository.
#[derive(Clone)]
pub struct PostgresAllocationRepository {
    pool: PgPool,
}

impl PostgresAllocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Result<AllocationRecord> {
        let status: String = row.try_get("status")?;
        let quantity: i64 = row.try_get("quantity")?;

        Ok(AllocationRecord {
            id: row.try_get::<Uuid, _>("id")?,
            requester_id: RequesterId::new(row.try_get::<String, _>("requester_id")?),
            resource_id: ResourceId::new(row.try_get::<String, _>("resource_id")?),
            quantity: u32::try_from(quantity).map_err(|_| {
                AllocationError::Unavailable(format!("quantity out of range: {quantity}"))
            })?,
            status: AllocationStatus::parse(&status).ok_or_else(|| {
                AllocationError::Unavailable(format!("unknown allocation status: {status}"))
            })?,
            allocated_at: row.try_get("allocated_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
        })
    }
}

#[async_trait]
impl AllocationRepository for PostgresAllocationRepository {
    async fn insert(&self, record: &AllocationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO allocation_records
                (id, requester_id, resource_id, quantity, status, allocated_at, cancelled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.requester_id.as_str())
        .bind(record.resource_id.as_str())
        .bind(i64::from(record.quantity))
        .bind(record.status.as_str())
        .bind(record.allocated_at)
        .bind(record.cancelled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AllocationRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, requester_id, resource_id, quantity, status, allocated_at, cancelled_at
            FROM allocation_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> Result<AllocationRecord> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            UPDATE allocation_records
            SET status = 'CANCELLED', cancelled_at = $2
            WHERE id = $1 AND status = 'ACTIVE'
            RETURNING id, requester_id, resource_id, quantity, status, allocated_at, cancelled_at
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_record(&row),
            None => match self.get(id).await? {
                Some(_) => Err(AllocationError::AlreadyCancelled(id)),
                None => Err(AllocationError::AllocationNotFound(id)),
            },
        }
    }

    async fn list_for_requester(
        &self,
        requester_id: &RequesterId,
    ) -> Result<Vec<AllocationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, requester_id, resource_id, quantity, status, allocated_at, cancelled_at
            FROM allocation_records
            WHERE requester_id = $1
            ORDER BY allocated_at DESC
            "#,
        )
        .bind(requester_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
