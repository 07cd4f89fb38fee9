//! Integration tests for the order-fulfillment saga.

use std::sync::Arc;
use std::time::Duration;

use domain::{
    InMemoryOrderRepository, Money, Order, OrderItem, OrderRepository, OrderRepositoryExt,
    OrderStatus, RequesterId, ShippingAddress,
};
use ledger::{InMemoryLedgerStore, Ledger, LedgerError, LedgerStore, ResourceId};
use saga::{
    CompensationRetrier, InMemoryDeliveryService, InMemoryEventPublisher, InMemorySagaRepository,
    MAX_COMPENSATION_ATTEMPTS, SagaError, SagaOrchestrator, SagaStatus, SagaStep,
};
use tokio::sync::watch;

type TestOrchestrator = SagaOrchestrator<
    InMemoryLedgerStore,
    InMemoryOrderRepository,
    InMemorySagaRepository,
    InMemoryDeliveryService,
    InMemoryEventPublisher,
>;

struct TestHarness {
    orchestrator: Arc<TestOrchestrator>,
    ledger_store: InMemoryLedgerStore,
    orders: InMemoryOrderRepository,
    sagas: InMemorySagaRepository,
    delivery: InMemoryDeliveryService,
    events: InMemoryEventPublisher,
}

impl TestHarness {
    /// SKU-001 starts with 10 units, SKU-002 with 5.
    async fn new() -> Self {
        let ledger_store = InMemoryLedgerStore::new();
        let orders = InMemoryOrderRepository::new();
        let sagas = InMemorySagaRepository::new();
        let delivery = InMemoryDeliveryService::new();
        let events = InMemoryEventPublisher::new();

        ledger_store
            .initialize(&ResourceId::new("SKU-001"), 10)
            .await
            .unwrap();
        ledger_store
            .initialize(&ResourceId::new("SKU-002"), 5)
            .await
            .unwrap();

        let orchestrator = Arc::new(SagaOrchestrator::new(
            Ledger::new(ledger_store.clone()),
            orders.clone(),
            sagas.clone(),
            delivery.clone(),
            events.clone(),
        ));

        Self {
            orchestrator,
            ledger_store,
            orders,
            sagas,
            delivery,
            events,
        }
    }

    /// 3 x SKU-001 (over two lines) and 1 x SKU-002.
    async fn create_order(&self) -> Order {
        self.create_order_with(vec![
            OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000)),
            OrderItem::new("SKU-002", "Gadget", 1, Money::from_cents(2500)),
            OrderItem::new("SKU-001", "Widget", 1, Money::from_cents(1000)),
        ])
        .await
    }

    async fn create_order_with(&self, items: Vec<OrderItem>) -> Order {
        let order = Order::new(
            RequesterId::new("user-1"),
            items,
            ShippingAddress::default(),
        )
        .unwrap();
        self.orders.insert(&order).await.unwrap();
        order
    }

    /// (available, reserved, total) for a resource.
    async fn stock(&self, resource: &str) -> (u32, u32, u32) {
        let record = self
            .ledger_store
            .get(&ResourceId::new(resource))
            .await
            .unwrap()
            .unwrap();
        (record.available(), record.reserved(), record.total())
    }

    async fn order_status(&self, order: &Order) -> OrderStatus {
        self.orders
            .get(order.order_number())
            .await
            .unwrap()
            .status()
    }
}

#[tokio::test]
async fn test_happy_path_full_order_fulfillment() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;

    let saga = h.orchestrator.start_saga(&order).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Started);
    assert_eq!(saga.current_step(), SagaStep::ProcessPayment);
    assert!(saga.saga_id().starts_with("SAGA-"));
    assert_eq!(h.order_status(&order).await, OrderStatus::Confirmed);
    assert_eq!(h.stock("SKU-001").await, (7, 3, 10));
    assert_eq!(h.stock("SKU-002").await, (4, 1, 5));

    let saga = h
        .orchestrator
        .complete_saga_after_payment(order.order_number())
        .await
        .unwrap();
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert_eq!(saga.completed_steps(), &SagaStep::ALL);
    assert_eq!(saga.current_step(), SagaStep::ConfirmOrder);
    assert!(saga.completed_at().is_some());
    assert_eq!(saga.delivery_id(), Some("DLV-0001"));

    assert_eq!(h.order_status(&order).await, OrderStatus::Paid);
    assert_eq!(h.stock("SKU-001").await, (7, 0, 7));
    assert_eq!(h.stock("SKU-002").await, (4, 0, 4));
    assert_eq!(h.delivery.active_count(), 1);
    assert_eq!(
        h.events.event_types_for(order.order_number()),
        vec!["OrderCreated"]
    );

    let stored = h.orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(stored.status(), SagaStatus::Completed);
}

#[tokio::test]
async fn test_start_saga_is_idempotent() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;

    let first = h.orchestrator.start_saga(&order).await.unwrap();
    let second = h.orchestrator.start_saga(&order).await.unwrap();

    assert_eq!(first.saga_id(), second.saga_id());
    assert_eq!(h.sagas.saga_count().await, 1);
    assert_eq!(h.stock("SKU-001").await, (7, 3, 10));
}

#[tokio::test]
async fn test_completing_twice_has_no_extra_effect() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    h.orchestrator
        .complete_saga_after_payment(order.order_number())
        .await
        .unwrap();
    let again = h
        .orchestrator
        .complete_saga_after_payment(order.order_number())
        .await
        .unwrap();

    assert_eq!(again.status(), SagaStatus::Completed);
    assert_eq!(h.stock("SKU-001").await, (7, 0, 7));
    assert_eq!(h.delivery.active_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_deduct_once() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = Arc::clone(&h.orchestrator);
        let order_number = order.order_number().to_string();
        handles.push(tokio::spawn(async move {
            orchestrator.complete_saga_after_payment(&order_number).await
        }));
    }

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(saga) => {
                assert_eq!(saga.status(), SagaStatus::Completed);
                completed += 1;
            }
            Err(SagaError::AlreadyInProgress(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(completed >= 1);
    assert_eq!(h.stock("SKU-001").await, (7, 0, 7));
    assert_eq!(h.delivery.active_count(), 1);
}

#[tokio::test]
async fn test_insufficient_stock_fails_saga_without_reservation() {
    let h = TestHarness::new().await;
    let order = h
        .create_order_with(vec![
            OrderItem::new("SKU-001", "Widget", 2, Money::from_cents(1000)),
            OrderItem::new("SKU-002", "Gadget", 6, Money::from_cents(2500)),
        ])
        .await;

    let result = h.orchestrator.start_saga(&order).await;
    assert!(matches!(
        result,
        Err(SagaError::Ledger(LedgerError::InsufficientStock { .. }))
    ));

    let saga = h.orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(saga.completed_steps().is_empty());

    let stored = h.orders.get(order.order_number()).await.unwrap();
    assert_eq!(stored.status(), OrderStatus::Cancelled);
    assert!(
        stored
            .cancel_reason()
            .is_some_and(|r| r.starts_with("Saga compensation: "))
    );
    assert_eq!(h.stock("SKU-001").await, (10, 0, 10));
    assert_eq!(h.stock("SKU-002").await, (5, 0, 5));
    assert_eq!(
        h.events.event_types_for(order.order_number()),
        vec!["OrderCancelled"]
    );
}

#[tokio::test]
async fn test_deduct_failure_releases_reservation() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    h.ledger_store.set_fail_on_deduct(true);
    let result = h
        .orchestrator
        .complete_saga_after_payment(order.order_number())
        .await;

    assert!(matches!(
        result,
        Err(SagaError::ExecutionFailed {
            step: SagaStep::DeductInventory,
            ..
        })
    ));

    let saga = h.orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(saga.last_error_message().is_some());
    assert_eq!(h.order_status(&order).await, OrderStatus::Cancelled);
    assert_eq!(h.stock("SKU-001").await, (10, 0, 10));
    assert_eq!(h.stock("SKU-002").await, (5, 0, 5));
    assert_eq!(h.delivery.active_count(), 0);
    assert_eq!(
        h.events.event_types_for(order.order_number()),
        vec!["OrderCreated", "OrderCancelled"]
    );
}

#[tokio::test]
async fn test_delivery_failure_cancels_order() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    h.delivery.set_fail_on_create(true);
    let result = h
        .orchestrator
        .complete_saga_after_payment(order.order_number())
        .await;

    assert!(matches!(
        result,
        Err(SagaError::ExecutionFailed {
            step: SagaStep::CreateDelivery,
            ..
        })
    ));

    let saga = h.orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(saga.is_step_completed(SagaStep::DeductInventory));
    assert_eq!(h.order_status(&order).await, OrderStatus::Cancelled);
    // Deducted stock has left the ledger and is not restored automatically.
    assert_eq!(h.stock("SKU-001").await, (7, 0, 7));
}

#[tokio::test]
async fn test_confirm_failure_cancels_created_delivery() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    h.orders.set_fail_on_save(true);
    let result = h
        .orchestrator
        .complete_saga_after_payment(order.order_number())
        .await;
    assert!(matches!(
        result,
        Err(SagaError::ExecutionFailed {
            step: SagaStep::ConfirmOrder,
            ..
        })
    ));
    assert!(h.delivery.is_cancelled("DLV-0001"));

    // The order could not be cancelled either, so compensation is retried.
    let saga = h.orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensating);
    assert_eq!(saga.compensation_attempts(), 1);

    h.orders.set_fail_on_save(false);
    assert_eq!(h.orchestrator.retry_stalled_compensations().await.unwrap(), 1);

    let saga = h.orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(h.order_status(&order).await, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_compensation_ceiling() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    h.ledger_store.set_fail_on_deduct(true);
    h.ledger_store.set_fail_on_release(true);
    let _ = h
        .orchestrator
        .complete_saga_after_payment(order.order_number())
        .await;

    for _ in 1..MAX_COMPENSATION_ATTEMPTS {
        let saga = h.orchestrator.get_saga(order.order_number()).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensating);
        h.orchestrator.retry_stalled_compensations().await.unwrap();
    }

    let saga = h.orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::CompensationFailed);
    assert_eq!(saga.compensation_attempts(), MAX_COMPENSATION_ATTEMPTS);
    assert!(saga.completed_at().is_some());

    // Parked sagas are no longer retried.
    assert_eq!(h.orchestrator.retry_stalled_compensations().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_order_awaiting_payment() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    let saga = h
        .orchestrator
        .cancel_order(order.order_number(), "changed my mind")
        .await
        .unwrap();

    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(saga.last_error_message(), Some("changed my mind"));
    assert_eq!(h.order_status(&order).await, OrderStatus::Cancelled);
    assert_eq!(h.stock("SKU-001").await, (10, 0, 10));

    assert!(matches!(
        h.orchestrator
            .complete_saga_after_payment(order.order_number())
            .await,
        Err(SagaError::InvalidState {
            status: SagaStatus::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_cancel_completed_saga_rejected() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();
    h.orchestrator
        .complete_saga_after_payment(order.order_number())
        .await
        .unwrap();

    assert!(matches!(
        h.orchestrator.cancel_order(order.order_number(), "late").await,
        Err(SagaError::InvalidState {
            status: SagaStatus::Completed,
            ..
        })
    ));
    assert_eq!(h.order_status(&order).await, OrderStatus::Paid);
}

#[tokio::test]
async fn test_missing_order_during_compensation() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    h.orders.remove(order.order_number()).await;
    let saga = h
        .orchestrator
        .cancel_order(order.order_number(), "abandoned")
        .await
        .unwrap();

    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(
        saga.last_error_message(),
        Some("Order not found during compensation")
    );
}

#[tokio::test]
async fn test_unknown_saga() {
    let h = TestHarness::new().await;

    assert!(matches!(
        h.orchestrator.complete_saga_after_payment("ORD-MISSING").await,
        Err(SagaError::SagaNotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.cancel_order("ORD-MISSING", "x").await,
        Err(SagaError::SagaNotFound(_))
    ));
}

#[tokio::test]
async fn test_event_failures_do_not_fail_saga() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.events.set_fail_on_publish(true);

    h.orchestrator.start_saga(&order).await.unwrap();
    let saga = h
        .orchestrator
        .complete_saga_after_payment(order.order_number())
        .await
        .unwrap();

    assert_eq!(saga.status(), SagaStatus::Completed);
    assert!(h.events.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retrier_recovers_stalled_compensation() {
    let h = TestHarness::new().await;
    let order = h.create_order().await;
    h.orchestrator.start_saga(&order).await.unwrap();

    h.ledger_store.set_fail_on_release(true);
    h.orchestrator
        .cancel_order(order.order_number(), "abandoned payment")
        .await
        .unwrap();
    assert_eq!(
        h.orchestrator
            .get_saga(order.order_number())
            .await
            .unwrap()
            .status(),
        SagaStatus::Compensating
    );
    h.ledger_store.set_fail_on_release(false);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retrier = CompensationRetrier::new(Arc::clone(&h.orchestrator), Duration::from_secs(30));
    let handle = tokio::spawn(retrier.run(shutdown_rx));

    tokio::time::sleep(Duration::from_secs(31)).await;

    let saga = h.orchestrator.get_saga(order.order_number()).await.unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(saga.last_error_message(), Some("abandoned payment"));
    assert_eq!(h.stock("SKU-001").await, (10, 0, 10));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}
