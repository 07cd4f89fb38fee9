//! API error types with HTTP response mapping.

use admission::QueueError;
use allocator::AllocationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::OrderError;
use ledger::LedgerError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The request lost to competing state (queue gate refused, for one).
    Conflict(String),
    Ledger(LedgerError),
    Allocation(AllocationError),
    Queue(QueueError),
    Order(OrderError),
    /// Saga execution error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Ledger(err) => (ledger_status(&err), err.to_string()),
            ApiError::Allocation(err) => (allocation_status(&err), err.to_string()),
            ApiError::Queue(err) => (queue_status(&err), err.to_string()),
            ApiError::Order(err) => (order_status(&err), err.to_string()),
            ApiError::Saga(err) => (saga_status(&err), err.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        } else if status == StatusCode::UNPROCESSABLE_ENTITY {
            tracing::warn!(error = %message, "saga execution failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %message, "request rejected");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InvalidQuantity { .. } | LedgerError::QuantityOverflow(_) => {
            StatusCode::BAD_REQUEST
        }
        LedgerError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InsufficientStock { .. }
        | LedgerError::StockDeductionFailed { .. }
        | LedgerError::StockReleaseFailed { .. }
        | LedgerError::ResourceAlreadyExists(_) => StatusCode::CONFLICT,
        LedgerError::InvalidRecord(_)
        | LedgerError::Unavailable(_)
        | LedgerError::Database(_)
        | LedgerError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn allocation_status(err: &AllocationError) -> StatusCode {
    match err {
        AllocationError::InvalidQuantity { .. } | AllocationError::InvalidPeriod { .. } => {
            StatusCode::BAD_REQUEST
        }
        AllocationError::ResourceNotOpen(_) | AllocationError::AllocationNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        AllocationError::SoldOut(_)
        | AllocationError::LimitExceeded { .. }
        | AllocationError::ResourceAlreadyOpen(_)
        | AllocationError::AlreadyCancelled(_)
        | AllocationError::NotStarted(_)
        | AllocationError::Ended(_) => StatusCode::CONFLICT,
        AllocationError::Unavailable(_)
        | AllocationError::Redis(_)
        | AllocationError::Database(_)
        | AllocationError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn queue_status(err: &QueueError) -> StatusCode {
    match err {
        QueueError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::NoItems
        | OrderError::InvalidQuantity { .. }
        | OrderError::InvalidPrice { .. }
        | OrderError::InvalidDiscount(_)
        | OrderError::AmountOverflow => StatusCode::BAD_REQUEST,
        OrderError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::InvalidStateTransition { .. } | OrderError::DuplicateOrder(_) => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::SagaNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::ExecutionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SagaError::DuplicateSaga(_)
        | SagaError::AlreadyInProgress(_)
        | SagaError::InvalidState { .. }
        | SagaError::VersionConflict { .. } => StatusCode::CONFLICT,
        SagaError::Ledger(e) => ledger_status(e),
        SagaError::Order(e) => order_status(e),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<AllocationError> for ApiError {
    fn from(err: AllocationError) -> Self {
        ApiError::Allocation(err)
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Queue(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
