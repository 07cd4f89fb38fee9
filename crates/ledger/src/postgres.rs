use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::record::plan_batch;
use crate::store::{LedgerLines, LedgerStore};
use crate::{
    LedgerError, LedgerOp, LedgerRecord, LedgerReference, MovementType, RequesterId, ResourceId,
    Result, StockMovement,
};

/// PostgreSQL-backed ledger store.
///
/// Batches run in one transaction that locks the affected rows with
/// `SELECT ... FOR UPDATE` in resource-id order.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Creates a new PostgreSQL ledger store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn quantity(row: &PgRow, column: &str) -> Result<u32> {
        let value: i64 = row.try_get(column)?;
        u32::try_from(value)
            .map_err(|_| LedgerError::InvalidRecord(format!("{column} out of range: {value}")))
    }

    fn row_to_record(row: &PgRow) -> Result<LedgerRecord> {
        LedgerRecord::from_parts(
            ResourceId::new(row.try_get::<String, _>("resource_id")?),
            Self::quantity(row, "available")?,
            Self::quantity(row, "reserved")?,
            Self::quantity(row, "total")?,
            row.try_get::<DateTime<Utc>, _>("updated_at")?,
        )
    }

    fn row_to_movement(row: &PgRow) -> Result<StockMovement> {
        let movement_type: String = row.try_get("movement_type")?;
        let movement_type = MovementType::parse(&movement_type).ok_or_else(|| {
            LedgerError::InvalidRecord(format!("unknown movement type: {movement_type}"))
        })?;

        let source_type: Option<String> = row.try_get("source_type")?;
        let source_id: Option<String> = row.try_get("source_id")?;
        let requester_id: Option<String> = row.try_get("requester_id")?;
        let reference = match (source_type, source_id, requester_id) {
            (Some(source_type), Some(source_id), Some(requester_id)) => Some(LedgerReference {
                source_type,
                source_id,
                requester_id: RequesterId::new(requester_id),
            }),
            _ => None,
        };

        Ok(StockMovement {
            id: row.try_get::<Uuid, _>("id")?,
            resource_id: ResourceId::new(row.try_get::<String, _>("resource_id")?),
            movement_type,
            quantity: Self::quantity(row, "quantity")?,
            available_before: Self::quantity(row, "available_before")?,
            available_after: Self::quantity(row, "available_after")?,
            reserved_before: Self::quantity(row, "reserved_before")?,
            reserved_after: Self::quantity(row, "reserved_after")?,
            reference,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    async fn insert_movement(
        tx: &mut Transaction<'_, Postgres>,
        movement: &StockMovement,
    ) -> Result<()> {
        let reference = movement.reference.as_ref();
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, resource_id, movement_type, quantity,
                available_before, available_after, reserved_before, reserved_after,
                source_type, source_id, requester_id, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(movement.id)
        .bind(movement.resource_id.as_str())
        .bind(movement.movement_type.as_str())
        .bind(i64::from(movement.quantity))
        .bind(i64::from(movement.available_before))
        .bind(i64::from(movement.available_after))
        .bind(i64::from(movement.reserved_before))
        .bind(i64::from(movement.reserved_after))
        .bind(reference.map(|r| r.source_type.clone()))
        .bind(reference.map(|r| r.source_id.clone()))
        .bind(reference.map(|r| r.requester_id.as_str().to_string()))
        .bind(movement.recorded_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn initialize(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord> {
        let record = LedgerRecord::new(resource_id.clone(), quantity);
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_records (resource_id, available, reserved, total, updated_at)
            VALUES ($1, $2, 0, $2, $3)
            ON CONFLICT (resource_id) DO NOTHING
            "#,
        )
        .bind(resource_id.as_str())
        .bind(i64::from(quantity))
        .bind(record.updated_at())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(LedgerError::ResourceAlreadyExists(resource_id.clone()));
        }

        Self::insert_movement(&mut tx, &StockMovement::initial(&record)).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn apply(
        &self,
        op: LedgerOp,
        lines: &LedgerLines,
        reference: Option<&LedgerReference>,
    ) -> Result<Vec<LedgerRecord>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = lines.keys().map(|id| id.as_str().to_string()).collect();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT resource_id, available, reserved, total, updated_at
            FROM ledger_records
            WHERE resource_id = ANY($1)
            ORDER BY resource_id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut records = BTreeMap::new();
        for row in &rows {
            let record = Self::row_to_record(row)?;
            records.insert(record.resource_id().clone(), record);
        }

        let mut holds = HashMap::new();
        if let Some(reference) = reference {
            let rows = sqlx::query(
                r#"
                SELECT resource_id, quantity
                FROM ledger_holds
                WHERE source_id = $1 AND resource_id = ANY($2)
                FOR UPDATE
                "#,
            )
            .bind(&reference.source_id)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?;

            for row in &rows {
                holds.insert(
                    ResourceId::new(row.try_get::<String, _>("resource_id")?),
                    Self::quantity(row, "quantity")?,
                );
            }
        }

        // Dropping `tx` on error rolls back.
        let outcome = plan_batch(op, lines, &records, &holds, reference)?;

        for movement in &outcome.movements {
            let Some(record) = outcome
                .records
                .iter()
                .find(|r| r.resource_id() == &movement.resource_id)
            else {
                continue;
            };

            sqlx::query(
                r#"
                UPDATE ledger_records
                SET available = $2, reserved = $3, total = $4, updated_at = $5
                WHERE resource_id = $1
                "#,
            )
            .bind(record.resource_id().as_str())
            .bind(i64::from(record.available()))
            .bind(i64::from(record.reserved()))
            .bind(i64::from(record.total()))
            .bind(record.updated_at())
            .execute(&mut *tx)
            .await?;

            Self::insert_movement(&mut tx, movement).await?;
        }

        if let Some(reference) = reference {
            for (resource_id, held) in &outcome.holds {
                if *held == 0 {
                    sqlx::query(
                        "DELETE FROM ledger_holds WHERE source_id = $1 AND resource_id = $2",
                    )
                    .bind(&reference.source_id)
                    .bind(resource_id.as_str())
                    .execute(&mut *tx)
                    .await?;
                } else {
                    sqlx::query(
                        r#"
                        INSERT INTO ledger_holds (source_id, resource_id, quantity)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (source_id, resource_id) DO UPDATE SET
                            quantity = EXCLUDED.quantity
                        "#,
                    )
                    .bind(&reference.source_id)
                    .bind(resource_id.as_str())
                    .bind(i64::from(*held))
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(outcome.records)
    }

    async fn get(&self, resource_id: &ResourceId) -> Result<Option<LedgerRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT resource_id, available, reserved, total, updated_at
            FROM ledger_records
            WHERE resource_id = $1
            "#,
        )
        .bind(resource_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn held(&self, source_id: &str, resource_id: &ResourceId) -> Result<u32> {
        let quantity: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM ledger_holds WHERE source_id = $1 AND resource_id = $2",
        )
        .bind(source_id)
        .bind(resource_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match quantity {
            Some(value) => u32::try_from(value)
                .map_err(|_| LedgerError::InvalidRecord(format!("hold out of range: {value}"))),
            None => Ok(0),
        }
    }

    async fn movements(&self, resource_id: &ResourceId) -> Result<Vec<StockMovement>> {
        let rows = sqlx::query(
            r#"
            SELECT id, resource_id, movement_type, quantity,
                   available_before, available_after, reserved_before, reserved_after,
                   source_type, source_id, requester_id, recorded_at
            FROM stock_movements
            WHERE resource_id = $1
            ORDER BY recorded_at DESC, id DESC
            "#,
        )
        .bind(resource_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_movement).collect()
    }
}
