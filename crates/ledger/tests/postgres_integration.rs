//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use ledger::{
    Ledger, LedgerError, LedgerLines, LedgerReference, LedgerStore, MovementType,
    PostgresLedgerStore, RequesterId, ResourceId,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
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
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_ledger_tables.sql"
            ))
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

async fn get_test_ledger() -> Ledger<PostgresLedgerStore> {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE ledger_holds, stock_movements, ledger_records")
        .execute(&pool)
        .await
        .unwrap();

    Ledger::new(PostgresLedgerStore::new(pool))
}

fn lines(entries: &[(&str, u32)]) -> LedgerLines {
    entries
        .iter()
        .map(|(id, qty)| (ResourceId::new(*id), *qty))
        .collect()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn initialize_and_reserve() {
    let ledger = get_test_ledger().await;
    let id = ResourceId::new("SKU-001");

    ledger.initialize(&id, 10).await.unwrap();
    let record = ledger.reserve(&id, 4).await.unwrap();

    assert_eq!((record.available(), record.reserved(), record.total()), (6, 4, 10));
    let stored = ledger.get(&id).await.unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn initialize_twice_is_rejected() {
    let ledger = get_test_ledger().await;
    let id = ResourceId::new("SKU-001");

    ledger.initialize(&id, 10).await.unwrap();
    let result = ledger.initialize(&id, 3).await;
    assert!(matches!(result, Err(LedgerError::ResourceAlreadyExists(_))));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn failed_batch_rolls_back() {
    let ledger = get_test_ledger().await;
    ledger.initialize(&ResourceId::new("A"), 10).await.unwrap();
    ledger.initialize(&ResourceId::new("B"), 1).await.unwrap();
    let reference = LedgerReference::order("ORD-1", RequesterId::new("u1"));

    let result = ledger
        .reserve_batch(&lines(&[("A", 3), ("B", 2)]), &reference)
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientStock { .. })
    ));

    let a = ledger.get(&ResourceId::new("A")).await.unwrap();
    assert_eq!((a.available(), a.reserved()), (10, 0));
    assert_eq!(
        ledger
            .store()
            .held("ORD-1", &ResourceId::new("A"))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn missing_resource_in_batch_is_not_found() {
    let ledger = get_test_ledger().await;
    ledger.initialize(&ResourceId::new("A"), 10).await.unwrap();
    let reference = LedgerReference::order("ORD-1", RequesterId::new("u1"));

    let result = ledger
        .reserve_batch(&lines(&[("A", 1), ("GHOST", 1)]), &reference)
        .await;
    assert!(matches!(result, Err(LedgerError::ResourceNotFound(_))));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reserve_deduct_release_with_holds() {
    let ledger = get_test_ledger().await;
    ledger.initialize(&ResourceId::new("A"), 10).await.unwrap();
    let order_lines = lines(&[("A", 4)]);
    let reference = LedgerReference::order("ORD-1", RequesterId::new("u1"));

    ledger.reserve_batch(&order_lines, &reference).await.unwrap();
    ledger.deduct_batch(&order_lines, &reference).await.unwrap();
    ledger
        .release_batch(&order_lines, &LedgerReference::order_cancel("ORD-1"))
        .await
        .unwrap();

    let record = ledger.get(&ResourceId::new("A")).await.unwrap();
    assert_eq!((record.available(), record.reserved(), record.total()), (6, 0, 6));

    let movements = ledger.movements(&ResourceId::new("A")).await.unwrap();
    let types: Vec<_> = movements.iter().map(|m| m.movement_type).collect();
    assert_eq!(
        types,
        vec![
            MovementType::Deduct,
            MovementType::Reserve,
            MovementType::Initial
        ]
    );
    let reserve = &movements[1];
    assert_eq!(
        reserve.reference.as_ref().map(|r| r.source_type.as_str()),
        Some("ORDER")
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_reservations_never_oversell() {
    let ledger = Arc::new(get_test_ledger().await);
    let id = ResourceId::new("SKU-HOT");
    ledger.initialize(&id, 10).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..30 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            let reference = LedgerReference::order(format!("ORD-{n}"), RequesterId::new("u"));
            ledger
                .reserve_batch(&lines(&[("SKU-HOT", 1)]), &reference)
                .await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(err) => assert!(err.is_contention(), "unexpected error: {err}"),
        }
    }

    assert_eq!(granted, 10);
    let record = ledger.get(&id).await.unwrap();
    assert_eq!((record.available(), record.reserved()), (0, 10));
}
