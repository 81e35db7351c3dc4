//! bountyindex-storage: projection and checkpoint backends for BountyIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement [`ProjectionStore`](bountyindex_core::projection::ProjectionStore)
//! and [`CheckpointStore`](bountyindex_core::checkpoint::CheckpointStore).

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
