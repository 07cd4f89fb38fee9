//! PostgreSQL saga repository tests.
//!
//! These tests use a shared PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::Version;
use saga::{
    PostgresSagaRepository, SagaError, SagaRepository, SagaRepositoryExt, SagaState, SagaStatus,
    SagaStep,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

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
            sqlx::raw_sql(include_str!("../../../migrations/003_create_saga_states.sql"))
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

async fn get_test_repository() -> PostgresSagaRepository {
    let info = get_container_info().await;
    let pool = PgPool::connect(&info.connection_string).await.unwrap();
    sqlx::query("TRUNCATE TABLE saga_states")
        .execute(&pool)
        .await
        .unwrap();
    PostgresSagaRepository::new(pool)
}

fn new_saga(order_number: &str) -> SagaState {
    SagaState::new(Uuid::new_v4(), order_number, Utc::now())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn round_trips_saga_state() {
    let repo = get_test_repository().await;
    let saga = new_saga("ORD-20240101-AAAA0001");
    assert_eq!(repo.insert(&saga).await.unwrap(), Version::first());

    let mut stored = repo.get("ORD-20240101-AAAA0001").await.unwrap();
    assert_eq!(stored.saga_id(), saga.saga_id());
    assert_eq!(stored.status(), SagaStatus::Started);
    assert!(stored.completed_steps().is_empty());

    stored.complete_step(SagaStep::ReserveInventory);
    stored.complete_step(SagaStep::ProcessPayment);
    stored.complete_step(SagaStep::DeductInventory);
    stored.record_delivery("DLV-0001");
    repo.persist(&mut stored).await.unwrap();

    let reloaded = repo.get("ORD-20240101-AAAA0001").await.unwrap();
    assert_eq!(reloaded.version(), Version::new(2));
    assert_eq!(reloaded.completed_steps(), stored.completed_steps());
    assert_eq!(reloaded.current_step(), SagaStep::ConfirmOrder);
    assert_eq!(reloaded.delivery_id(), Some("DLV-0001"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn one_saga_per_order_number() {
    let repo = get_test_repository().await;
    repo.insert(&new_saga("ORD-20240101-AAAA0002"))
        .await
        .unwrap();

    assert!(matches!(
        repo.insert(&new_saga("ORD-20240101-AAAA0002")).await,
        Err(SagaError::DuplicateSaga(_))
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn stale_version_is_rejected() {
    let repo = get_test_repository().await;
    repo.insert(&new_saga("ORD-20240101-AAAA0003"))
        .await
        .unwrap();

    let mut first = repo.get("ORD-20240101-AAAA0003").await.unwrap();
    let mut second = first.clone();

    first.complete_step(SagaStep::ReserveInventory);
    repo.persist(&mut first).await.unwrap();

    second.start_compensation("racing cancel");
    assert!(matches!(
        repo.persist(&mut second).await,
        Err(SagaError::VersionConflict { .. })
    ));

    assert!(matches!(
        repo.save(&new_saga("ORD-20240101-MISSING0")).await,
        Err(SagaError::SagaNotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn finds_sagas_by_status() {
    let repo = get_test_repository().await;
    for number in ["ORD-20240101-AAAA0004", "ORD-20240101-AAAA0005"] {
        repo.insert(&new_saga(number)).await.unwrap();
    }

    let mut saga = repo.get("ORD-20240101-AAAA0005").await.unwrap();
    saga.start_compensation("deduct failed");
    saga.record_compensation_failure("release failed", 3, Utc::now());
    repo.persist(&mut saga).await.unwrap();

    let compensating = repo.find_by_status(SagaStatus::Compensating).await.unwrap();
    assert_eq!(compensating.len(), 1);
    assert_eq!(compensating[0].compensation_attempts(), 1);
    assert_eq!(compensating[0].last_error_message(), Some("deduct failed"));
}
