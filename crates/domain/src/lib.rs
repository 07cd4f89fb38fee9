//! Order model for the fulfillment workflow.
//!
//! The [`Order`] aggregate carries its lines, amounts and status machine.
//! Orders are persisted through an [`OrderRepository`] (in-memory or
//! PostgreSQL) and driven forward by the fulfillment saga.

pub mod order;

pub use common::{RequesterId, ResourceId};
pub use order::{
    InMemoryOrderRepository, Money, Order, OrderError, OrderItem, OrderRepository,
    OrderRepositoryExt, OrderStatus, PostgresOrderRepository, Result, ShippingAddress,
    generate_order_number,
};
