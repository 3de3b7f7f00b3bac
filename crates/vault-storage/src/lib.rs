//! # vault-storage: the durable keyed account database
//!
//! [`KeyedDb`] is the contract every persona's on-disk state satisfies:
//! atomic `commit`, point `get`, churn-driven `get_transfer_info`, and
//! idempotent `handle_transfer`. [`MemoryKeyedDb`] backs tests and
//! `--development` vaults; [`SegmentKeyedDb`] is the crash-safe,
//! file-backed implementation used in production.

mod db;
mod error;
mod memory;
mod segment;

pub use db::KeyedDb;
pub use error::DbError;
pub use memory::MemoryKeyedDb;
pub use segment::SegmentKeyedDb;
