//! Integration tests for the Order aggregate and its repositories.

use std::sync::Arc;

use domain::{
    InMemoryOrderRepository, Money, Order, OrderError, OrderItem, OrderRepository,
    OrderRepositoryExt, OrderStatus, PostgresOrderRepository, RequesterId, ShippingAddress,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

fn sample_order(requester: &str) -> Order {
    let mut order = Order::new(
        RequesterId::new(requester),
        vec![
            OrderItem::new("SKU-001", "Widget A", 2, Money::from_cents(1000)),
            OrderItem::new("SKU-002", "Widget B", 1, Money::from_cents(500)),
            OrderItem::new("SKU-001", "Widget A", 1, Money::from_cents(1000)),
        ],
        ShippingAddress {
            receiver_name: "Kim".to_string(),
            receiver_phone: "010-0000-0000".to_string(),
            zip_code: "04524".to_string(),
            address1: "1 Main St".to_string(),
            address2: None,
        },
    )
    .unwrap();
    order.apply_discount(Money::from_cents(300)).unwrap();
    order
}

mod order_lifecycle {
    use super::*;

    #[tokio::test]
    async fn complete_order_lifecycle() {
        let repo = InMemoryOrderRepository::new();
        let mut order = sample_order("user-1");
        repo.insert(&order).await.unwrap();

        for step in [Order::confirm, Order::mark_paid, Order::ship, Order::deliver] {
            step(&mut order).unwrap();
            repo.save(&order).await.unwrap();
        }

        let stored = repo.get(order.order_number()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Delivered);
        assert_eq!(stored.total_amount(), Money::from_cents(3500));
        assert_eq!(stored.final_amount(), Money::from_cents(3200));
    }

    #[tokio::test]
    async fn cancelled_order_is_terminal() {
        let repo = InMemoryOrderRepository::new();
        let mut order = sample_order("user-1");
        repo.insert(&order).await.unwrap();

        order.confirm().unwrap();
        order.cancel("out of budget").unwrap();
        repo.save(&order).await.unwrap();

        let mut stored = repo.get(order.order_number()).await.unwrap();
        assert!(stored.status().is_terminal());
        assert!(matches!(
            stored.mark_paid(),
            Err(OrderError::InvalidStateTransition {
                current_state: OrderStatus::Cancelled,
                ..
            })
        ));
    }
}

mod postgres {
    //! These tests use a shared PostgreSQL container. Run with:
    //!
    //! ```bash
    //! cargo test -p domain --test order_integration -- --ignored --test-threads=1
    //! ```

    use super::*;

    struct ContainerInfo {
        #[allow(dead_code)] // Container must stay alive for tests
        container: ContainerAsync<Postgres>,
        connection_string: String,
    }

    static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

    async fn get_container_info() -> Arc<ContainerInfo> {
        CONTAINER
            .get_or_init(|| async {
                let container = Postgres::default().start().await.unwrap();
                let host = container.get_host().await.unwrap();
                let port = container.get_host_port_ipv4(5432).await.unwrap();
                let connection_string =
                    format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let temp_pool = PgPool::connect(&connection_string).await.unwrap();
                sqlx::raw_sql(include_str!("../../../migrations/004_create_orders.sql"))
                    .execute(&temp_pool)
                    .await
                    .unwrap();
                temp_pool.close().await;

                Arc::new(ContainerInfo {
                    container,
                    connection_string,
                })
            })
            .await
            .clone()
    }

    async fn get_test_repository() -> PostgresOrderRepository {
        let info = get_container_info().await;
        let pool = PgPool::connect(&info.connection_string).await.unwrap();
        sqlx::query("TRUNCATE TABLE orders")
            .execute(&pool)
            .await
            .unwrap();
        PostgresOrderRepository::new(pool)
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn round_trips_order() {
        let repo = get_test_repository().await;
        let order = sample_order("user-1");
        repo.insert(&order).await.unwrap();

        let stored = repo.get(order.order_number()).await.unwrap();
        assert_eq!(stored.order_number(), order.order_number());
        assert_eq!(stored.items(), order.items());
        assert_eq!(stored.shipping_address(), order.shipping_address());
        assert_eq!(stored.final_amount(), Money::from_cents(3200));
        assert_eq!(stored.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn duplicate_number_rejected() {
        let repo = get_test_repository().await;
        let order = sample_order("user-1");
        repo.insert(&order).await.unwrap();

        assert!(matches!(
            repo.insert(&order).await,
            Err(OrderError::DuplicateOrder(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn save_persists_cancellation() {
        let repo = get_test_repository().await;
        let mut order = sample_order("user-1");
        repo.insert(&order).await.unwrap();

        order.cancel("no longer needed").unwrap();
        repo.save(&order).await.unwrap();

        let stored = repo.get(order.order_number()).await.unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
        assert_eq!(stored.cancel_reason(), Some("no longer needed"));
        assert!(stored.cancelled_at().is_some());

        let listed = repo
            .list_for_requester(&RequesterId::new("user-1"))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }
}
