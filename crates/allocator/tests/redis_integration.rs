//! Redis integration tests
//!
//! These tests share one Redis container and flush it between tests, so they
//! run serially. Run with:
//!
//! ```bash
//! cargo test -p allocator --test redis_integration -- --ignored
//! ```

use std::sync::Arc;

use allocator::{
    AllocationError, Allocator, ArbitrationStore, ClaimOutcome, InMemoryAllocationRepository,
    RedisArbitrationStore, RequesterId, ResourceId,
};
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Redis>,
    url: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Redis::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(6379).await.unwrap();

            Arc::new(ContainerInfo {
                container,
                url: format!("redis://{host}:{port}"),
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> RedisArbitrationStore {
    let info = get_container_info().await;

    let client = redis::Client::open(info.url.as_str()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();

    RedisArbitrationStore::connect(&info.url).await.unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn claim_outcomes_match_script_codes() {
    let store = get_test_store().await;
    let id = ResourceId::new("COUPON-1");
    let a = RequesterId::new("a");

    assert_eq!(
        store.try_claim(&id, &a, 1, 1).await.unwrap(),
        ClaimOutcome::NotOpen
    );

    store.open(&id, 2).await.unwrap();
    assert_eq!(
        store.try_claim(&id, &a, 1, 1).await.unwrap(),
        ClaimOutcome::Granted { remaining: 1 }
    );
    assert_eq!(
        store.try_claim(&id, &a, 1, 1).await.unwrap(),
        ClaimOutcome::LimitExceeded
    );
    assert_eq!(
        store
            .try_claim(&id, &RequesterId::new("b"), 1, 1)
            .await
            .unwrap(),
        ClaimOutcome::Granted { remaining: 0 }
    );
    assert_eq!(
        store
            .try_claim(&id, &RequesterId::new("c"), 1, 1)
            .await
            .unwrap(),
        ClaimOutcome::SoldOut
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn rollback_and_close() {
    let store = get_test_store().await;
    let id = ResourceId::new("DEAL-1");
    let a = RequesterId::new("a");

    store.open(&id, 5).await.unwrap();
    store.try_claim(&id, &a, 3, 3).await.unwrap();
    assert_eq!(store.claimed_by(&id, &a).await.unwrap(), 3);

    store.rollback(&id, &a, 3).await.unwrap();
    assert_eq!(store.remaining(&id).await.unwrap(), Some(5));
    assert_eq!(store.claimed_by(&id, &a).await.unwrap(), 0);

    store.close(&id).await.unwrap();
    assert_eq!(store.remaining(&id).await.unwrap(), None);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn second_open_leaves_stock_untouched() {
    let store = get_test_store().await;
    let id = ResourceId::new("DEAL-9");

    store.open(&id, 2).await.unwrap();
    store.try_claim(&id, &RequesterId::new("a"), 1, 1).await.unwrap();
    store.try_claim(&id, &RequesterId::new("b"), 1, 1).await.unwrap();

    assert!(matches!(
        store.open(&id, 2).await,
        Err(AllocationError::ResourceAlreadyOpen(_))
    ));
    assert_eq!(store.remaining(&id).await.unwrap(), Some(0));
    assert_eq!(
        store
            .try_claim(&id, &RequesterId::new("c"), 1, 1)
            .await
            .unwrap(),
        ClaimOutcome::SoldOut
    );

    store.close(&id).await.unwrap();
    store.open(&id, 2).await.unwrap();
    assert_eq!(store.remaining(&id).await.unwrap(), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
#[ignore = "requires Docker"]
async fn no_over_allocation_across_connections() {
    let info = get_container_info().await;
    let id = ResourceId::new("COUPON-FLASH");
    get_test_store().await.open(&id, 50).await.unwrap();

    // Separate connection managers stand in for separate instances.
    let mut allocators = Vec::new();
    for _ in 0..4 {
        let store = RedisArbitrationStore::connect(&info.url).await.unwrap();
        allocators.push(Arc::new(Allocator::new(
            store,
            InMemoryAllocationRepository::new(),
        )));
    }

    let mut handles = Vec::new();
    for n in 0..100 {
        let allocator = allocators[n % allocators.len()].clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            allocator
                .allocate(&id, &RequesterId::new(format!("user-{n}")), 1, 1)
                .await
        }));
    }

    let mut granted = 0;
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(AllocationError::SoldOut(_)) => sold_out += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(granted, 50);
    assert_eq!(sold_out, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[serial]
#[ignore = "requires Docker"]
async fn per_requester_cap_under_race() {
    let store = Arc::new(get_test_store().await);
    let id = ResourceId::new("DEAL-CAP");
    store.open(&id, 100).await.unwrap();
    let allocator = Arc::new(Allocator::new(
        store.clone(),
        InMemoryAllocationRepository::new(),
    ));

    let requester = RequesterId::new("user-1");
    let mut handles = Vec::new();
    for _ in 0..10 {
        let allocator = allocator.clone();
        let id = id.clone();
        let requester = requester.clone();
        handles.push(tokio::spawn(async move {
            allocator.allocate(&id, &requester, 1, 1).await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(store.claimed_by(&id, &requester).await.unwrap(), 1);
}
