//! The sync engine: orchestrates backfill and live-watch phases.
//!
//! # Phase 1: BACKFILL
//! Target = `height - confirmation_depth` (capped by `to_block`). From
//! checkpoint + 1 to the target, in windows of `window_size` blocks:
//! fetch every source's logs concurrently → merge by `(block, log_index)` →
//! apply one event at a time → write checkpoint = window end.
//!
//! # Phase 2: WATCH
//! One subscription per source, all feeding a single bounded queue with one
//! consumer (this engine). Batches go through a [`ReorderBuffer`], so live
//! events keep the global order backfill has; the checkpoint advances to the
//! slowest source's watermark once its events are applied.
//!
//! # Failure handling
//! - Fetch failures abort the current window only; it is retried with
//!   backoff up to `fetch_retries` times, then surfaced.
//! - Closed subscriptions are re-opened from the source's watermark, up to
//!   `max_resubscribe_attempts` consecutive times per source.
//! - Store failures are fatal: the batch is abandoned and the checkpoint is
//!   left where it was, so a restart replays from the same point.
//!
//! # Shutdown
//! A [`ShutdownHandle`] stops the engine between batches: the in-flight
//! window or batch finishes applying, subscriptions are cancelled, and no
//! checkpoint is written past what was fully applied.

use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::checkpoint::{CheckpointManager, CheckpointStore};
use crate::cursor::{BlockWindow, Cursor};
use crate::error::IndexerError;
use crate::handler::EventRouter;
use crate::indexer::{SyncConfig, SyncState, SyncStats};
use crate::ledger::{BatchSink, LedgerClient, LiveMessage, Subscription};
use crate::merge::{merge_window, ReorderBuffer};
use crate::projection::ProjectionStore;
use crate::types::{ChainEvent, EventSource, IndexPhase};

/// Requests a graceful stop of a running [`SyncEngine`]. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Keeps the projection in sync with the ledger.
pub struct SyncEngine {
    config: SyncConfig,
    sources: Vec<EventSource>,
    ledger: Arc<dyn LedgerClient>,
    router: EventRouter,
    checkpoint: CheckpointManager,
    cursor: Cursor,
    stats: SyncStats,
    state: watch::Sender<SyncState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    /// Active subscriptions by source id; cancelled on stop.
    subscriptions: HashMap<String, Subscription>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        sources: Vec<EventSource>,
        ledger: Arc<dyn LedgerClient>,
        projection: Arc<dyn ProjectionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        if sources.is_empty() {
            return Err(IndexerError::Config("at least one event source is required".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &sources {
            if !seen.insert(source.id()) {
                return Err(IndexerError::Config(format!(
                    "source address {} is configured twice",
                    source.address
                )));
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state, _) = watch::channel(SyncState::Idle);
        Ok(Self {
            checkpoint: CheckpointManager::new(checkpoints, config.checkpoint_key.clone()),
            cursor: Cursor::new(0, config.confirmation_depth),
            config,
            sources,
            ledger,
            router: EventRouter::new(projection),
            stats: SyncStats::default(),
            state,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            subscriptions: HashMap::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn sources(&self) -> &[EventSource] {
        &self.sources
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Observe state transitions (e.g. to wait until the engine is watching).
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// Run until shutdown, `to_block`, or a fatal error.
    pub async fn run(&mut self) -> Result<SyncStats, IndexerError> {
        if self.state() != SyncState::Idle {
            return Err(IndexerError::Aborted {
                reason: format!("engine already ran (state: {})", self.state()),
            });
        }

        let result = self.run_phases().await;
        self.cancel_subscriptions();
        self.stats.checkpoint = self.checkpoint.current();

        match result {
            Ok(()) => {
                self.set_state(SyncState::Stopped);
                tracing::info!(
                    checkpoint = ?self.stats.checkpoint,
                    events = self.stats.events,
                    anomalies = self.stats.anomalies,
                    "Sync engine stopped"
                );
                Ok(self.stats.clone())
            }
            Err(e) => {
                self.set_state(SyncState::Failed);
                tracing::error!(
                    error = %e,
                    checkpoint = ?self.stats.checkpoint,
                    "Sync engine failed"
                );
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self) -> Result<(), IndexerError> {
        let start = match self.checkpoint.load().await? {
            Some(block) => {
                tracing::info!(block, key = %self.checkpoint.key(), "Resuming from checkpoint");
                block
            }
            None => {
                let block = self.config.start_block.saturating_sub(1);
                tracing::info!(start_block = self.config.start_block, "No checkpoint; starting fresh");
                block
            }
        };
        self.cursor = Cursor::new(start, self.config.confirmation_depth);

        self.set_state(SyncState::Backfilling);
        self.backfill().await?;

        if self.stop_requested() {
            self.set_state(SyncState::Stopping);
            return Ok(());
        }
        if let Some(to_block) = self.config.to_block {
            tracing::info!(to_block, at = self.cursor.block_number, "Bounded run complete");
            return Ok(());
        }

        self.set_state(SyncState::Watching);
        self.watch().await
    }

    // ─── Backfill ───────────────────────────────────────────────────────────────

    async fn backfill(&mut self) -> Result<(), IndexerError> {
        let height = self.current_height().await?;
        let mut target = self.cursor.confirmed_head(height);
        if let Some(to_block) = self.config.to_block {
            target = target.min(to_block);
        }

        if self.cursor.block_number >= target {
            tracing::info!(at = self.cursor.block_number, target, "Backfill not needed");
            return Ok(());
        }
        tracing::info!(
            from = self.cursor.next_block(),
            target,
            height,
            sources = self.sources.len(),
            "Starting backfill phase"
        );

        while let Some(window) = self.cursor.next_window(target, self.config.window_size) {
            if self.stop_requested() {
                tracing::info!(at = self.cursor.block_number, "Backfill interrupted by shutdown");
                return Ok(());
            }

            let events = self.fetch_window(window).await?;
            self.apply_all(&events, IndexPhase::Backfill).await?;
            self.commit(window.to).await?;
            self.stats.windows += 1;

            tracing::info!(
                from = window.from,
                to = window.to,
                target,
                events = events.len(),
                "Backfill window applied"
            );
        }

        tracing::info!(at = target, "Backfill complete");
        Ok(())
    }

    async fn current_height(&mut self) -> Result<u64, IndexerError> {
        let mut attempt = 0;
        loop {
            match self.ledger.current_height().await {
                Ok(height) => return Ok(height),
                Err(e) if self.should_retry(&e, attempt) => {
                    self.pause(attempt, "chain height", &e).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch every source's logs for `window` and merge them into key order.
    async fn fetch_window(&mut self, window: BlockWindow) -> Result<Vec<ChainEvent>, IndexerError> {
        let mut attempt = 0;
        loop {
            let result = {
                let ledger = &self.ledger;
                try_join_all(
                    self.sources
                        .iter()
                        .map(|source| ledger.get_logs(source, window.from, window.to)),
                )
                .await
            };
            match result {
                Ok(per_source) => return Ok(merge_window(per_source)),
                Err(e) if self.should_retry(&e, attempt) => {
                    let what = format!("window [{}, {}]", window.from, window.to);
                    self.pause(attempt, &what, &e).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn should_retry(&self, e: &IndexerError, attempt: u32) -> bool {
        e.is_transient() && attempt < self.config.fetch_retries
    }

    async fn pause(&mut self, attempt: u32, what: &str, e: &IndexerError) {
        let delay = self.config.backoff(attempt);
        self.stats.fetch_retries += 1;
        tracing::warn!(
            attempt = attempt + 1,
            max = self.config.fetch_retries,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Fetching {what} failed; retrying"
        );
        tokio::time::sleep(delay).await;
    }

    // ─── Apply + checkpoint ─────────────────────────────────────────────────────

    /// Apply events strictly one after another. The first store error aborts
    /// the batch.
    async fn apply_all(&mut self, events: &[ChainEvent], phase: IndexPhase) -> Result<(), IndexerError> {
        for event in events {
            let handled = match self.router.apply(event).await {
                Ok(handled) => handled,
                Err(e) => {
                    tracing::error!(
                        key = %event.key(),
                        event = %event.event_name,
                        %phase,
                        error = %e,
                        "Projection write failed; batch aborted"
                    );
                    return Err(e);
                }
            };
            self.stats.record(&handled);
        }
        Ok(())
    }

    async fn commit(&mut self, block: u64) -> Result<(), IndexerError> {
        self.checkpoint.advance(block).await?;
        self.cursor.advance(block);
        Ok(())
    }

    // ─── Watch ──────────────────────────────────────────────────────────────────

    async fn watch(&mut self) -> Result<(), IndexerError> {
        let (sink, mut queue) = mpsc::channel(self.config.live_queue_capacity);
        let from = self.cursor.next_block();
        let mut buffer = ReorderBuffer::new(&self.sources, self.cursor.block_number);
        let mut failures: HashMap<String, u32> = HashMap::new();

        for source in self.sources.clone() {
            self.open_subscription(&source, from, &sink, &mut failures).await?;
        }
        tracing::info!(from, sources = self.sources.len(), "Watching for confirmed logs");

        let mut stop = self.shutdown_rx.clone();
        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }

                message = queue.recv() => {
                    let Some(message) = message else {
                        return Err(IndexerError::Subscription {
                            source_name: "*".into(),
                            reason: "live queue closed".into(),
                        });
                    };
                    match message {
                        LiveMessage::Batch(batch) => {
                            failures.remove(&batch.source.id());
                            self.stats.live_batches += 1;
                            tracing::debug!(
                                source = %batch.source,
                                events = batch.events.len(),
                                through = batch.through_block,
                                "Live batch received"
                            );
                            buffer.push(batch);
                            if let Some(ready) = buffer.drain_ready() {
                                self.apply_all(&ready.events, IndexPhase::Live).await?;
                                self.commit(ready.through_block).await?;
                                if !ready.events.is_empty() {
                                    tracing::info!(
                                        events = ready.events.len(),
                                        through = ready.through_block,
                                        "Live events applied"
                                    );
                                }
                            }
                        }
                        LiveMessage::Closed { source, reason } => {
                            let attempt = self.note_subscription_failure(&source, &reason, &mut failures)?;
                            tracing::warn!(%source, %reason, attempt, "Subscription closed; re-subscribing");
                            self.subscriptions.remove(&source.id());
                            tokio::time::sleep(self.config.backoff(attempt.saturating_sub(1))).await;

                            let resume = buffer
                                .source_watermark(&source)
                                .unwrap_or_else(|| buffer.released())
                                + 1;
                            self.open_subscription(&source, resume, &sink, &mut failures).await?;
                            self.stats.resubscribes += 1;
                        }
                    }
                }
            }
        }

        self.set_state(SyncState::Stopping);
        tracing::info!(
            checkpoint = ?self.checkpoint.current(),
            pending = buffer.pending_len(),
            "Shutdown requested; live phase stopped"
        );
        Ok(())
    }

    async fn open_subscription(
        &mut self,
        source: &EventSource,
        from: u64,
        sink: &BatchSink,
        failures: &mut HashMap<String, u32>,
    ) -> Result<(), IndexerError> {
        loop {
            match self.ledger.subscribe(source, from, sink.clone()).await {
                Ok(subscription) => {
                    tracing::debug!(%source, from, "Subscribed");
                    self.subscriptions.insert(source.id(), subscription);
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    let attempt = self.note_subscription_failure(source, &e.to_string(), failures)?;
                    tracing::warn!(%source, error = %e, attempt, "Subscribe failed; retrying");
                    tokio::time::sleep(self.config.backoff(attempt.saturating_sub(1))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Count a consecutive subscription failure; error once the budget is spent.
    fn note_subscription_failure(
        &self,
        source: &EventSource,
        reason: &str,
        failures: &mut HashMap<String, u32>,
    ) -> Result<u32, IndexerError> {
        let count = failures.entry(source.id()).or_insert(0);
        *count += 1;
        if *count > self.config.max_resubscribe_attempts {
            return Err(IndexerError::Subscription {
                source_name: source.to_string(),
                reason: format!(
                    "gave up after {} re-subscribe attempts: {reason}",
                    self.config.max_resubscribe_attempts
                ),
            });
        }
        Ok(*count)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────────

    fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn set_state(&self, state: SyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Sync state changed");
        }
    }

    fn cancel_subscriptions(&mut self) {
        let count = self.subscriptions.len();
        for (_, subscription) in self.subscriptions.drain() {
            subscription.cancel();
        }
        if count > 0 {
            tracing::debug!(count, "Subscriptions cancelled");
        }
    }
}
