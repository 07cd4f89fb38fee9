//! HTTP API for order fulfillment, stock, allocation and admission queues.
//!
//! Exposes the saga orchestrator, ledger, allocator and admission queue as
//! JSON endpoints, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        // Orders and sagas
        .route("/orders", post(routes::orders::create))
        .route("/orders/{order_number}", get(routes::orders::get))
        .route("/orders/{order_number}/saga", get(routes::orders::saga))
        .route("/orders/{order_number}/payment", post(routes::orders::pay))
        .route("/orders/{order_number}/cancel", post(routes::orders::cancel))
        // Ledger
        .route(
            "/inventory/{resource_id}",
            post(routes::inventory::initialize).get(routes::inventory::get),
        )
        .route(
            "/inventory/{resource_id}/stock",
            post(routes::inventory::add_stock),
        )
        .route(
            "/inventory/{resource_id}/movements",
            get(routes::inventory::movements),
        )
        // Allocation
        .route(
            "/allocations/{resource_id}",
            post(routes::allocations::open).get(routes::allocations::remaining),
        )
        .route(
            "/allocations/{resource_id}/claims",
            post(routes::allocations::claim),
        )
        .route("/claims/{allocation_id}", delete(routes::allocations::cancel))
        .route(
            "/requesters/{requester_id}/allocations",
            get(routes::allocations::for_requester),
        )
        // Admission queues
        .route("/queues", get(routes::queues::list))
        .route(
            "/queues/tokens/{token}",
            get(routes::queues::status_by_token).delete(routes::queues::leave_by_token),
        )
        .route(
            "/queues/{event_type}/{event_id}",
            post(routes::queues::activate)
                .get(routes::queues::get)
                .delete(routes::queues::deactivate),
        )
        .route(
            "/queues/{event_type}/{event_id}/entries",
            post(routes::queues::enter),
        )
        .route(
            "/queues/{event_type}/{event_id}/entries/{requester_id}",
            get(routes::queues::status).delete(routes::queues::leave),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
