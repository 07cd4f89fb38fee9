use async_trait::async_trait;
use common::Version;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{Result, SagaError};
use crate::repository::SagaRepository;
use crate::state::{SagaState, SagaStatus, SagaStep};

/// PostgreSQL-backed saga repository over the `saga_states` table.
#[derive(Clone)]
pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_saga(row: &PgRow) -> Result<SagaState> {
        let saga_id: String = row.try_get("saga_id")?;
        let current_step: String = row.try_get("current_step")?;
        let status: String = row.try_get("status")?;
        let completed_steps: String = row.try_get("completed_steps")?;
        let attempts: i32 = row.try_get("compensation_attempts")?;

        let invalid = |what: &str| SagaError::InvalidRecord(format!("{saga_id}: {what}"));

        Ok(SagaState {
            order_id: row.try_get("order_id")?,
            order_number: row.try_get("order_number")?,
            current_step: SagaStep::parse(&current_step)
                .ok_or_else(|| invalid(&format!("unknown step {current_step}")))?,
            status: SagaStatus::parse(&status)
                .ok_or_else(|| invalid(&format!("unknown status {status}")))?,
            completed_steps: SagaState::decode_steps(&completed_steps)
                .ok_or_else(|| invalid(&format!("bad completed steps {completed_steps}")))?,
            delivery_id: row.try_get("delivery_id")?,
            compensation_attempts: u32::try_from(attempts)
                .map_err(|_| invalid("negative compensation attempts"))?,
            last_error_message: row.try_get("last_error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            version: Version::new(row.try_get("version")?),
            saga_id,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT saga_id, order_id, order_number, current_step, status, completed_steps,
           delivery_id, compensation_attempts, last_error_message, started_at,
           completed_at, version
    FROM saga_states
"#;

#[async_trait]
impl SagaRepository for PostgresSagaRepository {
    async fn insert(&self, saga: &SagaState) -> Result<Version> {
        let attempts = i32::try_from(saga.compensation_attempts)
            .map_err(|_| SagaError::InvalidRecord(format!("{}: attempts", saga.saga_id)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO saga_states
                (saga_id, order_id, order_number, current_step, status, completed_steps,
                 delivery_id, compensation_attempts, last_error_message, started_at,
                 completed_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (order_number) DO NOTHING
            "#,
        )
        .bind(&saga.saga_id)
        .bind(saga.order_id)
        .bind(&saga.order_number)
        .bind(saga.current_step.as_str())
        .bind(saga.status.as_str())
        .bind(saga.encode_steps())
        .bind(&saga.delivery_id)
        .bind(attempts)
        .bind(&saga.last_error_message)
        .bind(saga.started_at)
        .bind(saga.completed_at)
        .bind(Version::first().as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SagaError::DuplicateSaga(saga.order_number.clone()));
        }
        Ok(Version::first())
    }

    async fn save(&self, saga: &SagaState) -> Result<Version> {
        let attempts = i32::try_from(saga.compensation_attempts)
            .map_err(|_| SagaError::InvalidRecord(format!("{}: attempts", saga.saga_id)))?;
        let next = saga.version.next();

        let result = sqlx::query(
            r#"
            UPDATE saga_states
            SET current_step = $3, status = $4, completed_steps = $5, delivery_id = $6,
                compensation_attempts = $7, last_error_message = $8, completed_at = $9,
                version = $10
            WHERE saga_id = $1 AND version = $2
            "#,
        )
        .bind(&saga.saga_id)
        .bind(saga.version.as_i64())
        .bind(saga.current_step.as_str())
        .bind(saga.status.as_str())
        .bind(saga.encode_steps())
        .bind(&saga.delivery_id)
        .bind(attempts)
        .bind(&saga.last_error_message)
        .bind(saga.completed_at)
        .bind(next.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(next);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM saga_states WHERE saga_id = $1)")
                .bind(&saga.saga_id)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Err(SagaError::VersionConflict {
                saga_id: saga.saga_id.clone(),
                expected: saga.version,
            })
        } else {
            Err(SagaError::SagaNotFound(saga.order_number.clone()))
        }
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<SagaState>> {
        let row: Option<PgRow> = sqlx::query(&format!("{SELECT_COLUMNS} WHERE order_number = $1"))
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_saga).transpose()
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status = $1 ORDER BY started_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_saga).collect()
    }
}
