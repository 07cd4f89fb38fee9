//! Order placement, payment and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::RequesterId;
use domain::{Money, Order, OrderItem, OrderRepository, OrderRepositoryExt, ShippingAddress};
use saga::{PaymentGateway, PaymentOutcome, SagaState, SagaStatus, SagaStep};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub requester_id: String,
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub discount_cents: Option<i64>,
    pub shipping_address: ShippingAddress,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_number: String,
    pub requester_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub discount_cents: i64,
    pub final_cents: i64,
    pub shipping_address: ShippingAddress,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct SagaResponse {
    pub saga_id: String,
    pub order_number: String,
    pub status: String,
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub delivery_id: Option<String>,
    pub compensation_attempts: u32,
    pub last_error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_number: String,
    pub order_status: String,
    pub saga: SagaResponse,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub outcome: &'static str,
    pub payment_id: Option<String>,
    pub reason: Option<String>,
    pub saga: SagaResponse,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_number: order.order_number().to_string(),
            requester_id: order.requester_id().to_string(),
            status: order.status().as_str().to_string(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    product_name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            total_cents: order.total_amount().cents(),
            discount_cents: order.discount_amount().cents(),
            final_cents: order.final_amount().cents(),
            shipping_address: order.shipping_address().clone(),
            cancel_reason: order.cancel_reason().map(String::from),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

impl From<&SagaState> for SagaResponse {
    fn from(saga: &SagaState) -> Self {
        Self {
            saga_id: saga.saga_id().to_string(),
            order_number: saga.order_number().to_string(),
            status: saga.status().as_str().to_string(),
            current_step: saga.current_step().as_str().to_string(),
            completed_steps: saga
                .completed_steps()
                .iter()
                .map(|step| step.as_str().to_string())
                .collect(),
            delivery_id: saga.delivery_id().map(String::from),
            compensation_attempts: saga.compensation_attempts(),
            last_error_message: saga.last_error_message().map(String::from),
            started_at: saga.started_at(),
            completed_at: saga.completed_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: place an order and reserve its stock.
#[tracing::instrument(skip(state, req), fields(requester_id = %req.requester_id))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    if req.requester_id.trim().is_empty() {
        return Err(ApiError::BadRequest("requester_id is required".to_string()));
    }

    let items = req
        .items
        .iter()
        .map(|item| {
            OrderItem::new(
                item.product_id.as_str(),
                item.product_name.as_str(),
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();

    let mut order = Order::new(
        RequesterId::new(req.requester_id),
        items,
        req.shipping_address,
    )?;
    if let Some(discount) = req.discount_cents {
        order.apply_discount(Money::from_cents(discount))?;
    }

    state.orders.insert(&order).await?;
    let saga = state.orchestrator.start_saga(&order).await?;
    let order = state.orders.get(order.order_number()).await?;

    tracing::info!(
        order_number = order.order_number(),
        saga_id = saga.saga_id(),
        "order placed"
    );

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            order_number: order.order_number().to_string(),
            order_status: order.status().as_str().to_string(),
            saga: SagaResponse::from(&saga),
        }),
    ))
}

/// GET /orders/{order_number}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.orders.get(&order_number).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/{order_number}/saga
pub async fn saga(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let saga = state.orchestrator.get_saga(&order_number).await?;
    Ok(Json(SagaResponse::from(&saga)))
}

/// POST /orders/{order_number}/payment: charge the order, then finish the
/// saga on approval or cancel it on decline.
#[tracing::instrument(skip(state))]
pub async fn pay(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let saga = state.orchestrator.get_saga(&order_number).await?;

    // Never charge twice: a saga past the payment step only reports its
    // status (or the reason it cannot be completed).
    if saga.status() != SagaStatus::Started || saga.is_step_completed(SagaStep::ProcessPayment) {
        let saga = state
            .orchestrator
            .complete_saga_after_payment(&order_number)
            .await?;
        return Ok(Json(PaymentResponse {
            outcome: "APPROVED",
            payment_id: None,
            reason: None,
            saga: SagaResponse::from(&saga),
        }));
    }

    let order = state.orders.get(&order_number).await?;
    let outcome = state
        .payment
        .process(&order_number, order.final_amount())
        .await?;

    match outcome {
        PaymentOutcome::Approved { payment_id } => {
            tracing::info!(%payment_id, "payment approved");
            let saga = state
                .orchestrator
                .complete_saga_after_payment(&order_number)
                .await?;
            Ok(Json(PaymentResponse {
                outcome: "APPROVED",
                payment_id: Some(payment_id),
                reason: None,
                saga: SagaResponse::from(&saga),
            }))
        }
        PaymentOutcome::Declined { reason } => {
            tracing::info!(%reason, "payment declined");
            let saga = state
                .orchestrator
                .cancel_order(&order_number, &format!("Payment declined: {reason}"))
                .await?;
            Ok(Json(PaymentResponse {
                outcome: "DECLINED",
                payment_id: None,
                reason: Some(reason),
                saga: SagaResponse::from(&saga),
            }))
        }
    }
}

/// POST /orders/{order_number}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(order_number): Path<String>,
    req: Option<Json<CancelRequest>>,
) -> Result<Json<SagaResponse>, ApiError> {
    let reason = req
        .and_then(|Json(body)| body.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Cancelled by requester".to_string());

    let saga = state
        .orchestrator
        .cancel_order(&order_number, &reason)
        .await?;
    Ok(Json(SagaResponse::from(&saga)))
}
