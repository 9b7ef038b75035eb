//! Persistence: the action log, its spatial queries and the rollback session ledger.
//!
//! # Invariants
//! - Action records are append-only; only a purge deletes them.
//! - Records from one producer commit in the order they were logged.
//! - Reads never fail: an unavailable store answers empty.
//! - Session ids increase monotonically and sessions are never purged.

pub mod config;
pub mod purge;
pub mod query;
pub mod schema;
pub mod session;
pub mod store;
mod writer;

#[cfg(test)]
mod test_support;

pub use config::{IN_MEMORY_PATH, MAX_PAGE_SIZE, StoreConfig};
pub use purge::PurgeFilter;
pub use query::{AreaQuery, StoredAction};
pub use schema::SCHEMA_VERSION;
pub use session::{EntryTarget, RollbackSession, SessionEntry, StoredSessionEntry};
pub use store::{ActionStore, StoreError, StoreStats};
