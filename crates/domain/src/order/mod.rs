//! Order aggregate and related types.

mod aggregate;
mod postgres;
mod repository;
mod state;
mod value_objects;

pub use aggregate::{Order, generate_order_number};
pub use postgres::PostgresOrderRepository;
pub use repository::{InMemoryOrderRepository, OrderRepository, OrderRepositoryExt};
pub use state::OrderStatus;
pub use value_objects::{Money, OrderItem, ShippingAddress};

use common::ResourceId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// An order needs at least one line.
    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity {quantity} for {product_id} (must be greater than 0)")]
    InvalidQuantity {
        product_id: ResourceId,
        quantity: u32,
    },

    #[error("Invalid price {price} for {product_id} (must not be negative)")]
    InvalidPrice { product_id: ResourceId, price: i64 },

    #[error("Invalid discount: {0}")]
    InvalidDiscount(i64),

    /// Totals do not fit their integer types.
    #[error("Order amount overflow")]
    AmountOverflow,

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// An order with this number already exists.
    #[error("Duplicate order number: {0}")]
    DuplicateOrder(String),

    /// A stored row could not be mapped back to an order.
    #[error("Invalid stored order: {0}")]
    InvalidRecord(String),

    /// The backing store could not be reached.
    #[error("Order store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
