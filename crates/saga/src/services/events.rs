//! Order event publisher trait and in-memory implementation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Money, Order, RequesterId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Notification about an order, published after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    OrderCreated {
        order_number: String,
        requester_id: RequesterId,
        final_amount: Money,
        occurred_at: DateTime<Utc>,
    },
    OrderCancelled {
        order_number: String,
        requester_id: RequesterId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

impl OrderEvent {
    pub fn created(order: &Order) -> Self {
        OrderEvent::OrderCreated {
            order_number: order.order_number().to_string(),
            requester_id: order.requester_id().clone(),
            final_amount: order.final_amount(),
            occurred_at: Utc::now(),
        }
    }

    pub fn cancelled(order: &Order, reason: impl Into<String>) -> Self {
        OrderEvent::OrderCancelled {
            order_number: order.order_number().to_string(),
            requester_id: order.requester_id().clone(),
            reason: reason.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => "OrderCreated",
            OrderEvent::OrderCancelled { .. } => "OrderCancelled",
        }
    }

    pub fn order_number(&self) -> &str {
        match self {
            OrderEvent::OrderCreated { order_number, .. }
            | OrderEvent::OrderCancelled { order_number, .. } => order_number,
        }
    }
}

/// Outbound channel for order events.
///
/// Publishing is fire-and-forget: callers log failures and move on.
#[async_trait]
pub trait OrderEventPublisher: Send + Sync {
    async fn publish(&self, event: OrderEvent) -> Result<()>;

    async fn publish_order_created(&self, order: &Order) -> Result<()> {
        self.publish(OrderEvent::created(order)).await
    }

    async fn publish_order_cancelled(&self, order: &Order, reason: &str) -> Result<()> {
        self.publish(OrderEvent::cancelled(order, reason)).await
    }
}

#[derive(Debug, Default)]
struct InMemoryEventState {
    events: Vec<OrderEvent>,
    fail_on_publish: bool,
}

/// In-memory publisher that records every event.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventPublisher {
    state: Arc<Mutex<InMemoryEventState>>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryEventState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state().fail_on_publish = fail;
    }

    /// Returns a copy of every published event, oldest first.
    pub fn events(&self) -> Vec<OrderEvent> {
        self.state().events.clone()
    }

    pub fn event_types_for(&self, order_number: &str) -> Vec<&'static str> {
        self.state()
            .events
            .iter()
            .filter(|e| e.order_number() == order_number)
            .map(OrderEvent::event_type)
            .collect()
    }
}

#[async_trait]
impl OrderEventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        let mut state = self.state();
        if state.fail_on_publish {
            return Err(SagaError::EventPublisher("broker unavailable".to_string()));
        }
        state.events.push(event);
        Ok(())
    }
}
