//! Order-fulfillment saga.
//!
//! The saga runs in two legs around an external payment:
//! 1. Reserve inventory (order confirmed, saga waits for payment)
//! 2. Process payment (recorded when the payment callback arrives)
//! 3. Deduct inventory
//! 4. Create delivery
//! 5. Confirm order
//!
//! If any step fails, previously completed steps are compensated in reverse
//! order. Progress is persisted as a [`SagaState`] keyed by order number.

pub mod error;
pub mod orchestrator;
pub mod postgres;
pub mod repository;
pub mod retrier;
pub mod services;
pub mod state;

pub use error::{Result, SagaError};
pub use orchestrator::{MAX_COMPENSATION_ATTEMPTS, SagaOrchestrator};
pub use postgres::PostgresSagaRepository;
pub use repository::{InMemorySagaRepository, SagaRepository, SagaRepositoryExt};
pub use retrier::CompensationRetrier;
pub use services::{
    DeliveryService, InMemoryDeliveryService, InMemoryEventPublisher, InMemoryPaymentGateway,
    OrderEvent, OrderEventPublisher, PaymentGateway, PaymentOutcome,
};
pub use state::{SagaState, SagaStatus, SagaStep, generate_saga_id};
