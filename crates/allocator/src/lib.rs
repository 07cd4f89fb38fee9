//! Scarce-resource allocation.
//!
//! Given `Q` units and any number of concurrent claimants, at most `Q` units
//! are ever granted and no requester holds more than its cap. Both checks
//! and the decrement happen in one indivisible step at an
//! [`ArbitrationStore`]: a Lua script on a shared Redis for
//! multi-instance deployments, or a single critical section in process.
//!
//! The durable [`AllocationRecord`] is written after arbitration succeeds.

pub mod arbitration;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod redis_store;
pub mod repository;
pub mod service;
pub mod window;

pub use arbitration::{ArbitrationStore, ClaimOutcome};
pub use common::{RequesterId, ResourceId};
pub use error::{AllocationError, Result};
pub use memory::InMemoryArbitrationStore;
pub use postgres::PostgresAllocationRepository;
pub use redis_store::RedisArbitrationStore;
pub use service::{Allocation, Allocator};
pub use repository::{
    AllocationRecord, AllocationRepository, AllocationStatus, InMemoryAllocationRepository,
};
pub use window::SaleWindow;
