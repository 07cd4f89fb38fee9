//! Admission control for scarce-resource events.
//!
//! Requesters join a FIFO waiting queue per event. A recurring
//! [`PromotionSweeper`] lets a bounded batch through at each interval, and
//! only `ENTERED` requesters pass [`AdmissionQueue::validate_entry`]. Events
//! without an active queue are not gated at all.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod types;

pub use common::RequesterId;
pub use error::{QueueError, Result};
pub use memory::InMemoryQueueStore;
pub use redis_store::RedisQueueStore;
pub use service::{AdmissionQueue, DEFAULT_EXPIRED_RETENTION_SECS};
pub use store::{QueueStore, QueueStoreExt};
pub use sweeper::{PromotionSweeper, SweepReport};
pub use types::{EntryStatus, QueueConfig, QueueEntry, QueueKey, QueuePosition, WaitingQueue};
