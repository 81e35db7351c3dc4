//! Sync cursor: tracks the position in the chain and computes backfill windows.

use serde::{Deserialize, Serialize};

/// The engine's current position in the chain.
///
/// The cursor knows:
/// - Which block was last fully applied to the projection
/// - The confirmation depth (how many blocks behind head we consider "confirmed")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last block whose events are all applied.
    pub block_number: u64,
    /// Blocks within this distance of the head may still be reorganized.
    pub confirmation_depth: u64,
}

/// An inclusive block range fetched and applied as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWindow {
    pub from: u64,
    pub to: u64,
}

impl Cursor {
    pub fn new(block_number: u64, confirmation_depth: u64) -> Self {
        Self {
            block_number,
            confirmation_depth,
        }
    }

    /// Move the cursor forward. Never moves backwards.
    pub fn advance(&mut self, block_number: u64) {
        self.block_number = self.block_number.max(block_number);
    }

    /// Highest block considered final given the current chain height.
    pub fn confirmed_head(&self, chain_height: u64) -> u64 {
        chain_height.saturating_sub(self.confirmation_depth)
    }

    /// Returns the next block to process (cursor + 1).
    pub fn next_block(&self) -> u64 {
        self.block_number + 1
    }

    /// Next window of at most `window_size` blocks ending at or before
    /// `target`, or `None` once the cursor has caught up.
    pub fn next_window(&self, target: u64, window_size: u64) -> Option<BlockWindow> {
        if self.block_number >= target {
            return None;
        }
        let from = self.next_block();
        let to = self
            .block_number
            .saturating_add(window_size.max(1))
            .min(target);
        Some(BlockWindow { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advance_is_monotonic() {
        let mut cursor = Cursor::new(100, 12);
        cursor.advance(101);
        assert_eq!(cursor.block_number, 101);
        cursor.advance(50);
        assert_eq!(cursor.block_number, 101);
    }

    #[test]
    fn cursor_confirmation_depth() {
        let cursor = Cursor::new(100, 12);
        assert_eq!(cursor.confirmed_head(112), 100);
        assert_eq!(cursor.confirmed_head(5), 0);
    }

    #[test]
    fn cursor_next_block() {
        let cursor = Cursor::new(500, 6);
        assert_eq!(cursor.next_block(), 501);
    }

    #[test]
    fn windows_cover_range_without_gaps() {
        let mut cursor = Cursor::new(0, 0);
        let mut windows = vec![];
        while let Some(w) = cursor.next_window(2_500, 1_000) {
            windows.push(w);
            cursor.advance(w.to);
        }
        assert_eq!(
            windows,
            vec![
                BlockWindow { from: 1, to: 1_000 },
                BlockWindow { from: 1_001, to: 2_000 },
                BlockWindow { from: 2_001, to: 2_500 },
            ]
        );
    }

    #[test]
    fn no_window_when_caught_up() {
        let cursor = Cursor::new(90, 12);
        assert!(cursor.next_window(90, 1_000).is_none());
        assert!(cursor.next_window(80, 1_000).is_none());
    }
}
