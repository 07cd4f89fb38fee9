use async_trait::async_trait;
use common::RequesterId;
use sqlx::types::Json;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::repository::OrderRepository;
use super::{Money, Order, OrderError, OrderItem, OrderStatus, Result, ShippingAddress};

/// PostgreSQL-backed order repository.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: &PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let items: Json<Vec<OrderItem>> = row.try_get("items")?;
        let shipping_address: Json<ShippingAddress> = row.try_get("shipping_address")?;

        Ok(Order {
            id: row.try_get("id")?,
            order_number: row.try_get("order_number")?,
            requester_id: RequesterId::new(row.try_get::<String, _>("requester_id")?),
            items: items.0,
            total_amount: Money::from_cents(row.try_get("total_amount")?),
            discount_amount: Money::from_cents(row.try_get("discount_amount")?),
            shipping_address: shipping_address.0,
            status: OrderStatus::parse(&status)
                .ok_or_else(|| OrderError::InvalidRecord(format!("unknown status: {status}")))?,
            cancel_reason: row.try_get("cancel_reason")?,
            cancelled_at: row.try_get("cancelled_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, order_number, requester_id, items, total_amount, discount_amount,
           shipping_address, status, cancel_reason, cancelled_at, created_at, updated_at
    FROM orders
"#;

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    #[tracing::instrument(skip(self, order), fields(order_number = %order.order_number()))]
    async fn insert(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders
                (id, order_number, requester_id, items, total_amount, discount_amount,
                 shipping_address, status, cancel_reason, cancelled_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (order_number) DO NOTHING
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.requester_id.as_str())
        .bind(Json(&order.items))
        .bind(order.total_amount.cents())
        .bind(order.discount_amount.cents())
        .bind(Json(&order.shipping_address))
        .bind(order.status.as_str())
        .bind(&order.cancel_reason)
        .bind(order.cancelled_at)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrderError::DuplicateOrder(order.order_number.clone()));
        }
        tracing::debug!(status = order.status.as_str(), "order inserted");
        Ok(())
    }

    #[tracing::instrument(skip(self, order), fields(order_number = %order.order_number()))]
    async fn save(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET items = $2, total_amount = $3, discount_amount = $4, shipping_address = $5,
                status = $6, cancel_reason = $7, cancelled_at = $8, updated_at = $9
            WHERE order_number = $1
            "#,
        )
        .bind(&order.order_number)
        .bind(Json(&order.items))
        .bind(order.total_amount.cents())
        .bind(order.discount_amount.cents())
        .bind(Json(&order.shipping_address))
        .bind(order.status.as_str())
        .bind(&order.cancel_reason)
        .bind(order.cancelled_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrderError::OrderNotFound(order.order_number.clone()));
        }
        tracing::debug!(status = order.status.as_str(), "order saved");
        Ok(())
    }

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let row: Option<PgRow> = sqlx::query(&format!("{SELECT_COLUMNS} WHERE order_number = $1"))
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn list_for_requester(&self, requester_id: &RequesterId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE requester_id = $1 ORDER BY created_at DESC"
        ))
        .bind(requester_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_order).collect()
    }
}
