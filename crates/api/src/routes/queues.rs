//! Admission queue endpoints.

use std::sync::Arc;

use admission::{QueueConfig, QueueEntry, QueueKey, QueuePosition, WaitingQueue};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::RequesterId;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct EnterRequest {
    pub requester_id: String,
}

/// POST /queues/{event_type}/{event_id}: start gating an event.
#[tracing::instrument(skip(state, config))]
pub async fn activate(
    State(state): State<Arc<AppState>>,
    Path((event_type, event_id)): Path<(String, String)>,
    Json(config): Json<QueueConfig>,
) -> Result<(StatusCode, Json<WaitingQueue>), ApiError> {
    let queue = state
        .queue
        .activate(&QueueKey::new(event_type, event_id), config)
        .await?;
    Ok((StatusCode::CREATED, Json(queue)))
}

/// DELETE /queues/{event_type}/{event_id}
#[tracing::instrument(skip(state))]
pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path((event_type, event_id)): Path<(String, String)>,
) -> Result<Json<WaitingQueue>, ApiError> {
    let queue = state
        .queue
        .deactivate(&QueueKey::new(event_type, event_id))
        .await?;
    Ok(Json(queue))
}

/// GET /queues/{event_type}/{event_id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((event_type, event_id)): Path<(String, String)>,
) -> Result<Json<WaitingQueue>, ApiError> {
    let queue = state
        .queue
        .get_queue(&QueueKey::new(event_type, event_id))
        .await?;
    Ok(Json(queue))
}

/// GET /queues
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<WaitingQueue>>, ApiError> {
    Ok(Json(state.queue.active_queues().await?))
}

/// POST /queues/{event_type}/{event_id}/entries: join, or get the live
/// entry back.
#[tracing::instrument(skip(state, req), fields(requester_id = %req.requester_id))]
pub async fn enter(
    State(state): State<Arc<AppState>>,
    Path((event_type, event_id)): Path<(String, String)>,
    Json(req): Json<EnterRequest>,
) -> Result<Json<QueuePosition>, ApiError> {
    if req.requester_id.trim().is_empty() {
        return Err(ApiError::BadRequest("requester_id is required".to_string()));
    }
    let position = state
        .queue
        .enter_queue(
            &QueueKey::new(event_type, event_id),
            &RequesterId::new(req.requester_id),
        )
        .await?;
    Ok(Json(position))
}

/// GET /queues/{event_type}/{event_id}/entries/{requester_id}
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path((event_type, event_id, requester_id)): Path<(String, String, String)>,
) -> Result<Json<QueuePosition>, ApiError> {
    let position = state
        .queue
        .get_status(
            &QueueKey::new(event_type, event_id),
            &RequesterId::new(requester_id),
        )
        .await?;
    Ok(Json(position))
}

/// DELETE /queues/{event_type}/{event_id}/entries/{requester_id}
#[tracing::instrument(skip(state))]
pub async fn leave(
    State(state): State<Arc<AppState>>,
    Path((event_type, event_id, requester_id)): Path<(String, String, String)>,
) -> Result<Json<QueueEntry>, ApiError> {
    let entry = state
        .queue
        .leave_queue(
            &QueueKey::new(event_type, event_id),
            &RequesterId::new(requester_id),
        )
        .await?;
    Ok(Json(entry))
}

/// GET /queues/tokens/{token}
pub async fn status_by_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<Uuid>,
) -> Result<Json<QueuePosition>, ApiError> {
    Ok(Json(state.queue.get_status_by_token(token).await?))
}

/// DELETE /queues/tokens/{token}
#[tracing::instrument(skip(state))]
pub async fn leave_by_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<Uuid>,
) -> Result<Json<QueueEntry>, ApiError> {
    Ok(Json(state.queue.leave_by_token(token).await?))
}
