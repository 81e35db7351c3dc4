//! Cross-source ordering.
//!
//! Block number and log index are global to the chain, so events from every
//! source sort into one total order by [`EventKey`]. Backfill merges whole
//! windows with [`merge_window`]. Live mode uses a [`ReorderBuffer`]: each
//! source reports how far it has been scanned (`through_block`), and only
//! events at or below the slowest source's watermark are released, in key
//! order. An event from one source therefore never applies ahead of an
//! earlier event another source has yet to deliver.

use std::collections::{BTreeMap, HashMap};

use crate::ledger::LiveBatch;
use crate::types::{ChainEvent, EventKey, EventSource};

/// Merge per-source event lists into one list ordered by `(block, log_index)`.
///
/// Events delivered twice (same key) are kept once.
pub fn merge_window(per_source: Vec<Vec<ChainEvent>>) -> Vec<ChainEvent> {
    let mut all: Vec<ChainEvent> = per_source.into_iter().flatten().collect();
    all.sort_by_key(ChainEvent::key);
    all.dedup_by_key(|e| e.key());
    all
}

/// Events that became safe to apply, plus the block they complete.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyBatch {
    pub events: Vec<ChainEvent>,
    /// Every event at or below this block has been released.
    pub through_block: u64,
}

/// Buffers live events until every source has been scanned past them.
#[derive(Debug)]
pub struct ReorderBuffer {
    /// Source id → block the source has been scanned through.
    watermarks: HashMap<String, u64>,
    pending: BTreeMap<EventKey, ChainEvent>,
    /// Highest block already released.
    released: u64,
}

impl ReorderBuffer {
    /// Track `sources`, all of which have been applied through `start_block`.
    pub fn new(sources: &[EventSource], start_block: u64) -> Self {
        Self {
            watermarks: sources.iter().map(|s| (s.id(), start_block)).collect(),
            pending: BTreeMap::new(),
            released: start_block,
        }
    }

    /// Add a batch. Events at or below the released block were already
    /// applied and are dropped; watermarks never move backwards.
    pub fn push(&mut self, batch: LiveBatch) {
        let id = batch.source.id();
        let Some(mark) = self.watermarks.get_mut(&id) else {
            tracing::warn!(source = %batch.source, "batch from untracked source dropped");
            return;
        };
        *mark = (*mark).max(batch.through_block);
        for event in batch.events {
            if event.block_number > self.released {
                self.pending.insert(event.key(), event);
            }
        }
    }

    /// The slowest source's watermark.
    pub fn watermark(&self) -> u64 {
        self.watermarks.values().copied().min().unwrap_or(self.released)
    }

    /// Watermark of one source, if tracked.
    pub fn source_watermark(&self, source: &EventSource) -> Option<u64> {
        self.watermarks.get(&source.id()).copied()
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Release everything at or below the global watermark, in key order.
    ///
    /// Returns `None` when the watermark has not moved since the last release.
    pub fn drain_ready(&mut self) -> Option<ReadyBatch> {
        let through = self.watermark();
        if through <= self.released {
            return None;
        }
        let rest = self.pending.split_off(&EventKey::new(through + 1, 0));
        let ready = std::mem::replace(&mut self.pending, rest);
        self.released = through;
        Some(ReadyBatch {
            events: ready.into_values().collect(),
            through_block: through,
        })
    }
}
