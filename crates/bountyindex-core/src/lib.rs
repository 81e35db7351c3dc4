//! bountyindex-core: keeps a relational projection of agent/bounty ledger
//! events eventually consistent with the chain.
//!
//! # Architecture
//!
//! ```text
//! SyncEngine
//!   ├── LedgerClient       (height, range queries, live subscriptions)
//!   ├── merge / ReorderBuffer (global (block, log_index) order across sources)
//!   ├── EventRouter        (typed LedgerEvent → ProjectionStore mutations)
//!   └── CheckpointManager  ("indexer:lastBlock", written after each window)
//! ```

pub mod checkpoint;
pub mod cursor;
pub mod error;
pub mod events;
pub mod handler;
pub mod indexer;
pub mod ledger;
pub mod merge;
pub mod projection;
pub mod sync;
pub mod types;

pub use checkpoint::{CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use cursor::{BlockWindow, Cursor};
pub use error::{DecodeError, IndexerError};
pub use events::{EventKind, LedgerEvent};
pub use handler::{EventRouter, Handled};
pub use indexer::{SyncConfig, SyncConfigBuilder, SyncState, SyncStats};
pub use ledger::{LedgerClient, LiveBatch, LiveMessage, MemoryLedger, Subscription};
pub use merge::ReorderBuffer;
pub use projection::{ProjectionStore, BASELINE_REPUTATION};
pub use sync::{ShutdownHandle, SyncEngine};
pub use types::{ChainEvent, EventKey, EventSource, SourceKind};
