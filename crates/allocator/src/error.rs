use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{RequesterId, ResourceId};

/// Errors that can occur when allocating scarce resources.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Quantity and limit must both be positive.
    #[error("Invalid quantity {quantity} (limit {limit})")]
    InvalidQuantity { quantity: u32, limit: u32 },

    /// No units left for this resource.
    #[error("Sold out: {0}")]
    SoldOut(ResourceId),

    /// The requester would exceed its per-resource cap.
    #[error("Requester {requester_id} reached the limit of {limit} for {resource_id}")]
    LimitExceeded {
        resource_id: ResourceId,
        requester_id: RequesterId,
        limit: u32,
    },

    /// The resource was never opened for allocation (or has been closed).
    #[error("Resource not open for allocation: {0}")]
    ResourceNotOpen(ResourceId),

    /// The resource is already open. Close it before opening it again.
    #[error("Resource already open for allocation: {0}")]
    ResourceAlreadyOpen(ResourceId),

    #[error("Allocation not found: {0}")]
    AllocationNotFound(Uuid),

    #[error("Allocation already cancelled: {0}")]
    AlreadyCancelled(Uuid),

    /// A sale window that ends before it starts.
    #[error("Invalid sale period: starts {starts_at}, ends {ends_at}")]
    InvalidPeriod {
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },

    #[error("Sale has not started (starts {0})")]
    NotStarted(DateTime<Utc>),

    #[error("Sale has ended (ended {0})")]
    Ended(DateTime<Utc>),

    /// The backing store could not be reached.
    #[error("Allocation store unavailable: {0}")]
    Unavailable(String),

    /// A Redis error occurred.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl AllocationError {
    /// Returns true for the expected negative outcomes of competing for a
    /// resource. These are counted, not logged as errors.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            AllocationError::SoldOut(_) | AllocationError::LimitExceeded { .. }
        )
    }
}

/// Result type for allocation operations.
pub type Result<T> = std::result::Result<T, AllocationError>;
