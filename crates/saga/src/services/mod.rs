//! Collaborator traits and in-memory implementations for saga steps.

pub mod delivery;
pub mod events;
pub mod payment;

pub use delivery::{DeliveryService, InMemoryDeliveryService};
pub use events::{InMemoryEventPublisher, OrderEvent, OrderEventPublisher};
pub use payment::{InMemoryPaymentGateway, PaymentGateway, PaymentOutcome};
