//! Sync engine configuration, lifecycle state and run statistics.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::checkpoint::DEFAULT_CHECKPOINT_KEY;
use crate::error::IndexerError;
use crate::handler::Handled;

/// Configuration for a [`SyncEngine`](crate::sync::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Key under which the last processed block is stored.
    pub checkpoint_key: String,
    /// First block to index when no checkpoint exists.
    pub start_block: u64,
    /// Optional end block. Backfill stops there and live mode is skipped.
    pub to_block: Option<u64>,
    /// Blocks within this distance of the head are never backfilled.
    /// Typical values: 12 (Ethereum PoS), 64 (Ethereum safe), 1 (fast chains).
    pub confirmation_depth: u64,
    /// Blocks per backfill window.
    pub window_size: u64,
    /// Retries of a failed window fetch before the error is surfaced.
    pub fetch_retries: u32,
    /// Base delay between retries (doubles per attempt).
    pub retry_backoff_ms: u64,
    /// Consecutive re-subscriptions allowed per source before giving up.
    pub max_resubscribe_attempts: u32,
    /// Capacity of the single live queue shared by all subscriptions.
    pub live_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            checkpoint_key: DEFAULT_CHECKPOINT_KEY.into(),
            start_block: 0,
            to_block: None,
            confirmation_depth: 12,
            window_size: 1000,
            fetch_retries: 3,
            retry_backoff_ms: 500,
            max_resubscribe_attempts: 5,
            live_queue_capacity: 1024,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.window_size == 0 {
            return Err(IndexerError::Config("window_size must be at least 1".into()));
        }
        if self.live_queue_capacity == 0 {
            return Err(IndexerError::Config(
                "live_queue_capacity must be at least 1".into(),
            ));
        }
        if self.checkpoint_key.trim().is_empty() {
            return Err(IndexerError::Config("checkpoint_key must not be empty".into()));
        }
        if let Some(to) = self.to_block {
            if to < self.start_block {
                return Err(IndexerError::Config(format!(
                    "to_block {to} is below start_block {}",
                    self.start_block
                )));
            }
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

/// Fluent builder for [`SyncConfig`].
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint_key(mut self, key: impl Into<String>) -> Self {
        self.config.checkpoint_key = key.into();
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the end block (bounded backfill, no live phase).
    pub fn to_block(mut self, block: u64) -> Self {
        self.config.to_block = Some(block);
        self
    }

    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    pub fn window_size(mut self, size: u64) -> Self {
        self.config.window_size = size;
        self
    }

    pub fn fetch_retries(mut self, retries: u32) -> Self {
        self.config.fetch_retries = retries;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_resubscribe_attempts(mut self, attempts: u32) -> Self {
        self.config.max_resubscribe_attempts = attempts;
        self
    }

    pub fn live_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.live_queue_capacity = capacity;
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<SyncConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Lifecycle state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Not yet started.
    Idle,
    /// Applying historical windows up to the confirmed head.
    Backfilling,
    /// Following confirmed logs pushed by subscriptions.
    Watching,
    /// Shutdown requested; finishing the in-flight batch.
    Stopping,
    /// Terminated cleanly.
    Stopped,
    /// Terminated by a fatal error.
    Failed,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Watching => write!(f, "watching"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Counters accumulated over one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Events handed to the router.
    pub events: u64,
    pub mutations: u64,
    pub duplicates: u64,
    pub anomalies: u64,
    pub field_errors: u64,
    /// Unknown or undecodable events.
    pub skipped: u64,
    pub windows: u64,
    pub live_batches: u64,
    pub fetch_retries: u64,
    pub resubscribes: u64,
    /// Checkpoint value when the run ended.
    pub checkpoint: Option<u64>,
}

impl SyncStats {
    pub fn record(&mut self, handled: &Handled) {
        self.events += 1;
        self.mutations += u64::from(handled.applied);
        self.duplicates += u64::from(handled.duplicates);
        self.anomalies += u64::from(handled.anomalies);
        self.field_errors += u64::from(handled.field_errors);
        if handled.skipped {
            self.skipped += 1;
        }
    }
}
