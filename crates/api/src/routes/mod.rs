pub mod allocations;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod orders;
pub mod queues;
