//! Persistence layer for events, groups, rules and the dispatch queue.
//!
//! Backed by SeaORM over SQLite (WAL mode). The aggregation pipeline only
//! relies on four store contracts (atomic find-or-insert of collecting
//! groups, conditional lease upserts, filtered traversal, counted queries),
//! so the schema stays portable to any store that can express them.

pub mod entities;
pub mod error;
pub mod store;

#[cfg(test)]
mod tests;

pub use error::{Result, StorageError};
pub use store::lock::Lease;
pub use store::queue::QueueJob;
pub use store::robot::DingRobotRow;
pub use store::template::{TemplateRow, TEMPLATE_TYPE_MATCH_RULE, TEMPLATE_TYPE_TRIGGER_RULE};
pub use store::user::UserRow;
pub use store::Store;
