//! Delivery service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::Order;

use crate::error::{Result, SagaError};

/// Trait for delivery operations.
#[async_trait]
pub trait DeliveryService: Send + Sync {
    /// Creates a delivery for an order and returns its id.
    async fn create_delivery(&self, order: &Order) -> Result<String>;

    /// Cancels a previously created delivery. Cancelling twice is a no-op.
    async fn cancel_delivery(&self, delivery_id: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct DeliveryRecord {
    order_number: String,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct InMemoryDeliveryState {
    deliveries: HashMap<String, DeliveryRecord>,
    next_id: u32,
    fail_on_create: bool,
    fail_on_cancel: bool,
}

/// In-memory delivery service for testing and the demo server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeliveryService {
    state: Arc<Mutex<InMemoryDeliveryState>>,
}

impl InMemoryDeliveryService {
    /// Creates a new in-memory delivery service.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryDeliveryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the service to fail on create_delivery calls.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state().fail_on_create = fail;
    }

    /// Configures the service to fail on cancel_delivery calls.
    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.state().fail_on_cancel = fail;
    }

    /// Returns the number of deliveries that have not been cancelled.
    pub fn active_count(&self) -> usize {
        self.state()
            .deliveries
            .values()
            .filter(|d| !d.cancelled)
            .count()
    }

    /// Returns true if the delivery exists and was cancelled.
    pub fn is_cancelled(&self, delivery_id: &str) -> bool {
        self.state()
            .deliveries
            .get(delivery_id)
            .is_some_and(|d| d.cancelled)
    }

    /// Returns the order a delivery was created for.
    pub fn order_for(&self, delivery_id: &str) -> Option<String> {
        self.state()
            .deliveries
            .get(delivery_id)
            .map(|d| d.order_number.clone())
    }
}

#[async_trait]
impl DeliveryService for InMemoryDeliveryService {
    async fn create_delivery(&self, order: &Order) -> Result<String> {
        let mut state = self.state();

        if state.fail_on_create {
            return Err(SagaError::DeliveryService(
                "Delivery unavailable".to_string(),
            ));
        }

        state.next_id += 1;
        let delivery_id = format!("DLV-{:04}", state.next_id);
        state.deliveries.insert(
            delivery_id.clone(),
            DeliveryRecord {
                order_number: order.order_number().to_string(),
                cancelled: false,
            },
        );

        Ok(delivery_id)
    }

    async fn cancel_delivery(&self, delivery_id: &str) -> Result<()> {
        let mut state = self.state();

        if state.fail_on_cancel {
            return Err(SagaError::DeliveryService(
                "Delivery cancellation unavailable".to_string(),
            ));
        }

        let record = state
            .deliveries
            .get_mut(delivery_id)
            .ok_or_else(|| SagaError::DeliveryService(format!("Unknown delivery {delivery_id}")))?;
        record.cancelled = true;
        Ok(())
    }
}
