//! Ledger client contract: height, range queries and live subscriptions.
//!
//! The sync engine only talks to the ledger through [`LedgerClient`]. The EVM
//! implementation lives in `bountyindex-evm`; [`MemoryLedger`] is a scripted
//! in-process ledger for tests and demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::IndexerError;
use crate::types::{ChainEvent, EventSource};

/// A batch of confirmed logs pushed by one source's subscription.
#[derive(Debug, Clone)]
pub struct LiveBatch {
    pub source: EventSource,
    /// Events ordered by `(block_number, log_index)`.
    pub events: Vec<ChainEvent>,
    /// The source has been scanned through this block (inclusive).
    ///
    /// Acts as a progress watermark: it advances even when `events` is empty,
    /// which lets the engine release buffered events from other sources.
    pub through_block: u64,
}

/// Messages flowing from subscriptions into the engine's single queue.
#[derive(Debug)]
pub enum LiveMessage {
    Batch(LiveBatch),
    /// The subscription stopped delivering (connection drop, node error).
    Closed { source: EventSource, reason: String },
}

/// Sending half of the engine's live queue, cloned into every subscription.
pub type BatchSink = mpsc::Sender<LiveMessage>;

/// Handle to a running subscription. Cancelled on `cancel()` or drop.
pub struct Subscription {
    source: EventSource,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(source: EventSource, task: JoinHandle<()>) -> Self {
        Self {
            source,
            task: Some(task),
        }
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    /// Returns `true` while the subscription task is still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop delivering batches.
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("source", &self.source)
            .field("active", &self.is_active())
            .finish()
    }
}

/// The external ledger the projection mirrors.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Current chain height (latest block number).
    async fn current_height(&self) -> Result<u64, IndexerError>;

    /// All logs of `source` in `[from, to]` (inclusive), ordered by
    /// `(block_number, log_index)`.
    async fn get_logs(
        &self,
        source: &EventSource,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEvent>, IndexerError>;

    /// Start pushing confirmed logs of `source`, beginning at `from_block`,
    /// into `sink`. Every delivered [`LiveBatch`] carries the block the
    /// source has been scanned through.
    async fn subscribe(
        &self,
        source: &EventSource,
        from_block: u64,
        sink: BatchSink,
    ) -> Result<Subscription, IndexerError>;
}

// ─── In-memory ledger (for testing) ───────────────────────────────────────────

#[derive(Default)]
struct LedgerState {
    height: u64,
    confirmation_depth: u64,
    logs: Vec<ChainEvent>,
    /// Remaining `get_logs` calls that should fail with an RPC error.
    failing_fetches: u32,
    /// Bumped by `drop_subscriptions`; tasks of an older generation close.
    generation: u64,
    fetch_calls: u64,
    subscribe_calls: HashMap<String, u64>,
}

/// Scripted in-memory ledger.
///
/// Logs are appended with [`push`](Self::push), the head moves with
/// [`set_height`](Self::set_height). Subscriptions poll the state and push
/// logs that are at least `confirmation_depth` blocks below the head.
#[derive(Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    poll_interval: Duration,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            poll_interval: Duration::from_millis(5),
        }
    }

    /// Set how often subscriptions re-check the ledger.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Confirmation depth applied by live subscriptions.
    pub fn with_confirmation_depth(self, depth: u64) -> Self {
        self.with_state(|s| s.confirmation_depth = depth);
        self
    }

    /// Append a log. Raises the height if the log is above it.
    pub fn push(&self, event: ChainEvent) {
        self.with_state(|s| {
            s.height = s.height.max(event.block_number);
            s.logs.push(event);
        });
    }

    pub fn set_height(&self, height: u64) {
        self.with_state(|s| s.height = height);
    }

    /// Make the next `n` `get_logs` calls fail with a transient error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.with_state(|s| s.failing_fetches = n);
    }

    /// Close every running subscription, as a dropped connection would.
    pub fn drop_subscriptions(&self) {
        self.with_state(|s| s.generation += 1);
    }

    /// Number of `get_logs` calls made so far (including failed ones).
    pub fn fetch_calls(&self) -> u64 {
        self.with_state(|s| s.fetch_calls)
    }

    /// Number of `subscribe` calls made for `source`.
    pub fn subscribe_calls(&self, source: &EventSource) -> u64 {
        self.with_state(|s| s.subscribe_calls.get(&source.id()).copied().unwrap_or(0))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        // A poisoned lock only happens if a test panicked mid-update.
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn logs_in_range(state: &LedgerState, source: &EventSource, from: u64, to: u64) -> Vec<ChainEvent> {
        let mut out: Vec<ChainEvent> = state
            .logs
            .iter()
            .filter(|e| source.matches_address(&e.contract))
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned()
            .collect();
        out.sort_by_key(ChainEvent::key);
        out
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn current_height(&self) -> Result<u64, IndexerError> {
        Ok(self.with_state(|s| s.height))
    }

    async fn get_logs(
        &self,
        source: &EventSource,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEvent>, IndexerError> {
        self.with_state(|s| {
            s.fetch_calls += 1;
            if s.failing_fetches > 0 {
                s.failing_fetches -= 1;
                return Err(IndexerError::Rpc(format!(
                    "injected failure fetching {source} [{from}, {to}]"
                )));
            }
            Ok(Self::logs_in_range(s, source, from, to))
        })
    }

    async fn subscribe(
        &self,
        source: &EventSource,
        from_block: u64,
        sink: BatchSink,
    ) -> Result<Subscription, IndexerError> {
        let generation = self.with_state(|s| {
            *s.subscribe_calls.entry(source.id()).or_default() += 1;
            s.generation
        });

        let ledger = self.clone();
        let task_source = source.clone();
        let task = tokio::spawn(async move {
            let mut next = from_block;
            loop {
                let step = ledger.with_state(|s| {
                    if s.generation != generation {
                        return None;
                    }
                    let confirmed = s.height.saturating_sub(s.confirmation_depth);
                    if confirmed < next {
                        return Some(None);
                    }
                    let events = Self::logs_in_range(s, &task_source, next, confirmed);
                    Some(Some((events, confirmed)))
                });

                match step {
                    None => {
                        let _ = sink
                            .send(LiveMessage::Closed {
                                source: task_source.clone(),
                                reason: "connection dropped".into(),
                            })
                            .await;
                        return;
                    }
                    Some(Some((events, through_block))) => {
                        let batch = LiveBatch {
                            source: task_source.clone(),
                            events,
                            through_block,
                        };
                        if sink.send(LiveMessage::Batch(batch)).await.is_err() {
                            return; // engine gone
                        }
                        next = through_block + 1;
                    }
                    Some(None) => {}
                }
                tokio::time::sleep(ledger.poll_interval).await;
            }
        });

        Ok(Subscription::new(source.clone(), task))
    }
}
