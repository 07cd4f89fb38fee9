use thiserror::Error;

use crate::ResourceId;

/// Errors that can occur when mutating or reading the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Quantities must be strictly positive.
    #[error("Invalid quantity {quantity} for resource {resource_id}")]
    InvalidQuantity {
        resource_id: ResourceId,
        quantity: u32,
    },

    /// Not enough available stock to reserve.
    #[error(
        "Insufficient stock for resource {resource_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        resource_id: ResourceId,
        requested: u32,
        available: u32,
    },

    /// Deducting more than is currently reserved.
    #[error(
        "Stock deduction failed for resource {resource_id}: requested {requested}, reserved {reserved}"
    )]
    StockDeductionFailed {
        resource_id: ResourceId,
        requested: u32,
        reserved: u32,
    },

    /// Releasing more than is currently reserved.
    #[error(
        "Stock release failed for resource {resource_id}: requested {requested}, reserved {reserved}"
    )]
    StockReleaseFailed {
        resource_id: ResourceId,
        requested: u32,
        reserved: u32,
    },

    /// Adding stock would overflow the record.
    #[error("Quantity overflow for resource {0}")]
    QuantityOverflow(ResourceId),

    /// The resource has no ledger record.
    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// The resource already has a ledger record.
    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(ResourceId),

    /// A persisted row violates the ledger invariant.
    #[error("Invalid ledger record: {0}")]
    InvalidRecord(String),

    /// The backing store could not be reached.
    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Returns true for the expected negative outcome of competing for stock.
    pub fn is_contention(&self) -> bool {
        matches!(self, LedgerError::InsufficientStock { .. })
    }

    /// Returns the stable error code used in logs and API responses.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidQuantity { .. } => "INVALID_STOCK_QUANTITY",
            LedgerError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            LedgerError::StockDeductionFailed { .. } => "STOCK_DEDUCTION_FAILED",
            LedgerError::StockReleaseFailed { .. } => "STOCK_RELEASE_FAILED",
            LedgerError::QuantityOverflow(_) => "INVALID_STOCK_QUANTITY",
            LedgerError::ResourceNotFound(_) => "INVENTORY_NOT_FOUND",
            LedgerError::ResourceAlreadyExists(_) => "INVENTORY_ALREADY_EXISTS",
            LedgerError::InvalidRecord(_)
            | LedgerError::Unavailable(_)
            | LedgerError::Database(_)
            | LedgerError::Migration(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
