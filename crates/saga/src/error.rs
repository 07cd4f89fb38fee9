//! Saga error types.

use common::Version;
use domain::OrderError;
use ledger::LedgerError;
use thiserror::Error;

use crate::state::{SagaStatus, SagaStep};

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga exists for the order number.
    #[error("Saga not found for order: {0}")]
    SagaNotFound(String),

    /// A saga for this order number has already been persisted.
    #[error("Saga already exists for order: {0}")]
    DuplicateSaga(String),

    /// A forward step failed after payment. Compensation has already run.
    #[error("Saga {saga_id} failed at step {step}: {reason}")]
    ExecutionFailed {
        saga_id: String,
        step: SagaStep,
        reason: String,
    },

    /// Another caller is already driving this saga.
    #[error("Saga already in progress for order: {0}")]
    AlreadyInProgress(String),

    /// Saga is in the wrong status for the requested operation.
    #[error("Invalid saga state: cannot {action} saga {saga_id} in {status} status")]
    InvalidState {
        saga_id: String,
        status: SagaStatus,
        action: &'static str,
    },

    /// The stored saga moved on since it was loaded.
    #[error("Version conflict for saga {saga_id}: expected {expected}")]
    VersionConflict { saga_id: String, expected: Version },

    /// Ledger error from a reserve, deduct or release step.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Order error from loading, transitioning or saving the order.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Payment gateway error.
    #[error("Payment service error: {0}")]
    PaymentService(String),

    /// Delivery service error.
    #[error("Delivery service error: {0}")]
    DeliveryService(String),

    /// Event publisher error.
    #[error("Event publisher error: {0}")]
    EventPublisher(String),

    /// A stored row could not be mapped back to a saga.
    #[error("Invalid stored saga: {0}")]
    InvalidRecord(String),

    /// The saga store could not be reached.
    #[error("Saga store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
