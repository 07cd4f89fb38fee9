//! Scarce-resource allocation endpoints.

use std::sync::Arc;

use admission::QueueKey;
use allocator::{Allocation, AllocationRecord};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{RequesterId, ResourceId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OpenRequest {
    pub total: u32,
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub requester_id: String,
    pub quantity: u32,
    /// Per-requester cap for this resource.
    pub limit: u32,
    /// Admission queue guarding the claim, if any.
    #[serde(default)]
    pub queue: Option<QueueKey>,
}

#[derive(Serialize)]
pub struct RemainingResponse {
    pub resource_id: ResourceId,
    pub remaining: u32,
}

/// POST /allocations/{resource_id}: make `total` units claimable. 409 while
/// the resource is already open.
#[tracing::instrument(skip(state, req))]
pub async fn open(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Json(req): Json<OpenRequest>,
) -> Result<(StatusCode, Json<RemainingResponse>), ApiError> {
    if req.total == 0 {
        return Err(ApiError::BadRequest("total must be positive".to_string()));
    }
    let resource_id = ResourceId::new(resource_id);
    state.allocator.open(&resource_id, req.total).await?;
    Ok((
        StatusCode::CREATED,
        Json(RemainingResponse {
            resource_id,
            remaining: req.total,
        }),
    ))
}

/// GET /allocations/{resource_id}
pub async fn remaining(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
) -> Result<Json<RemainingResponse>, ApiError> {
    let resource_id = ResourceId::new(resource_id);
    let remaining = state.allocator.remaining(&resource_id).await?;
    Ok(Json(RemainingResponse {
        resource_id,
        remaining,
    }))
}

/// POST /allocations/{resource_id}/claims: claim units, after passing the
/// admission queue when one is named.
#[tracing::instrument(skip(state, req), fields(requester_id = %req.requester_id))]
pub async fn claim(
    State(state): State<Arc<AppState>>,
    Path(resource_id): Path<String>,
    Json(req): Json<ClaimRequest>,
) -> Result<(StatusCode, Json<Allocation>), ApiError> {
    if req.requester_id.trim().is_empty() {
        return Err(ApiError::BadRequest("requester_id is required".to_string()));
    }
    let requester_id = RequesterId::new(req.requester_id);

    if let Some(key) = &req.queue {
        if !state.queue.validate_entry(key, &requester_id).await? {
            metrics::counter!("queue_gate_refused_total").increment(1);
            return Err(ApiError::Conflict(format!(
                "Requester {requester_id} has not been admitted by queue {key}"
            )));
        }
    }

    let allocation = state
        .allocator
        .allocate(
            &ResourceId::new(resource_id),
            &requester_id,
            req.quantity,
            req.limit,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(allocation)))
}

/// DELETE /claims/{allocation_id}: return the units to the pool.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(allocation_id): Path<Uuid>,
) -> Result<Json<AllocationRecord>, ApiError> {
    let record = state.allocator.cancel(allocation_id).await?;
    Ok(Json(record))
}

/// GET /requesters/{requester_id}/allocations
pub async fn for_requester(
    State(state): State<Arc<AppState>>,
    Path(requester_id): Path<String>,
) -> Result<Json<Vec<AllocationRecord>>, ApiError> {
    let records = state
        .allocator
        .allocations_for(&RequesterId::new(requester_id))
        .await?;
    Ok(Json(records))
}
