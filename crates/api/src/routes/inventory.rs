//! Ledger endpoints: stock records, inbound stock and the movement trail.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::ResourceId;
use ledger::{LedgerRecord, StockMovement};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct QuantityRequest {
    pub quantity: u32,
}

/// POST /inventory/{resource_id}: create the ledger record.
#[tracing::instrument(skip(state, req))]
pub async fn initialize(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Json(req): Json<QuantityRequest>,
) -> Result<(StatusCode, Json<LedgerRecord>), ApiError> {
    let record = state
        .ledger()
        .initialize(&ResourceId::new(resource_id), req.quantity)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /inventory/{resource_id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
) -> Result<Json<LedgerRecord>, ApiError> {
    let record = state.ledger().get(&ResourceId::new(resource_id)).await?;
    Ok(Json(record))
}

/// POST /inventory/{resource_id}/stock: inbound stock.
#[tracing::instrument(skip(state, req))]
pub async fn add_stock(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Json(req): Json<QuantityRequest>,
) -> Result<Json<LedgerRecord>, ApiError> {
    let record = state
        .ledger()
        .add_stock(&ResourceId::new(resource_id), req.quantity)
        .await?;
    Ok(Json(record))
}

/// GET /inventory/{resource_id}/movements: newest first.
pub async fn movements(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
) -> Result<Json<Vec<StockMovement>>, ApiError> {
    let resource_id = ResourceId::new(resource_id);
    // An unknown resource is a 404, not an empty trail.
    state.ledger().get(&resource_id).await?;
    let movements = state.ledger().movements(&resource_id).await?;
    Ok(Json(movements))
}
