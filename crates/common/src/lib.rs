//! Shared types used across the fulfillment, ledger, allocation and
//! admission crates.

pub mod types;

pub use types::{RequesterId, ResourceId, Version};
