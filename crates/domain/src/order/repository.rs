use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::RequesterId;
use tokio::sync::RwLock;

use super::{Order, OrderError, Result};

/// Durable storage for orders, keyed by order number.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order. Fails with `DuplicateOrder` if the number is taken.
    async fn insert(&self, order: &Order) -> Result<()>;

    /// Overwrites an existing order.
    async fn save(&self, order: &Order) -> Result<()>;

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Orders of one requester, newest first.
    async fn list_for_requester(&self, requester_id: &RequesterId) -> Result<Vec<Order>>;
}

/// Extension trait for OrderRepository with convenience methods.
#[async_trait]
pub trait OrderRepositoryExt: OrderRepository {
    /// Like `find_by_number`, but a missing order is an error.
    async fn get(&self, order_number: &str) -> Result<Order> {
        self.find_by_number(order_number)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(order_number.to_string()))
    }
}

// Blanket implementation for all OrderRepository implementations
impl<T: OrderRepository + ?Sized> OrderRepositoryExt for T {}

#[async_trait]
impl<T: OrderRepository + ?Sized> OrderRepository for Arc<T> {
    async fn insert(&self, order: &Order) -> Result<()> {
        (**self).insert(order).await
    }

    async fn save(&self, order: &Order) -> Result<()> {
        (**self).save(order).await
    }

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        (**self).find_by_number(order_number).await
    }

    async fn list_for_requester(&self, requester_id: &RequesterId) -> Result<Vec<Order>> {
        (**self).list_for_requester(requester_id).await
    }
}

/// In-memory order repository for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    fail_on_save: Arc<AtomicBool>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures `save` to fail as if the store were unreachable.
    /// `insert` and reads keep working.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.fail_on_save.store(fail, Ordering::SeqCst);
    }

    /// Removes an order outright, simulating a row lost underneath the saga.
    pub async fn remove(&self, order_number: &str) -> Option<Order> {
        self.orders.write().await.remove(order_number)
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    #[tracing::instrument(level = "debug", skip(self, order), fields(order_number = %order.order_number()))]
    async fn insert(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(order.order_number()) {
            tracing::debug!("order number already taken");
            return Err(OrderError::DuplicateOrder(order.order_number().to_string()));
        }
        orders.insert(order.order_number().to_string(), order.clone());
        tracing::debug!(status = order.status().as_str(), "order inserted");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, order), fields(order_number = %order.order_number()))]
    async fn save(&self, order: &Order) -> Result<()> {
        if self.fail_on_save.load(Ordering::SeqCst) {
            return Err(OrderError::Unavailable(
                "save rejected by test toggle".to_string(),
            ));
        }
        let mut orders = self.orders.write().await;
        match orders.get_mut(order.order_number()) {
            Some(existing) => {
                *existing = order.clone();
                tracing::debug!(status = order.status().as_str(), "order saved");
                Ok(())
            }
            None => Err(OrderError::OrderNotFound(order.order_number().to_string())),
        }
    }

    async fn find_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(order_number).cloned())
    }

    async fn list_for_requester(&self, requester_id: &RequesterId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|order| order.requester_id() == requester_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(found)
    }
}
