//! Stock ledger for finite, countable resources.
//!
//! Every record keeps `available + reserved == total`. Quantities move
//! between the two buckets through four operations:
//! - `reserve`: available → reserved
//! - `deduct`: reserved → consumed (leaves total)
//! - `release`: reserved → available
//! - `add_stock`: inbound → available
//!
//! Batch variants are all-or-nothing and track a per-reference hold so that
//! releasing a reservation is safe to repeat.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod service;
pub mod store;

pub use common::{RequesterId, ResourceId};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use record::{LedgerOp, LedgerRecord, LedgerReference, MovementType, StockMovement};
pub use service::Ledger;
pub use store::{LedgerLines, LedgerStore, LedgerStoreExt};
