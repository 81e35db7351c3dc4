//! [`LedgerClient`] over an EVM JSON-RPC endpoint.
//!
//! Historical queries go straight to `eth_getLogs`. Live subscriptions are
//! polling tasks: on every tick the task computes the confirmed head
//! (`height - confirmation_depth`), fetches the unseen range and pushes one
//! [`LiveBatch`] carrying the block it has scanned through.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use bountyindex_core::error::IndexerError;
use bountyindex_core::ledger::{BatchSink, LedgerClient, LiveBatch, LiveMessage, Subscription};
use bountyindex_core::types::{ChainEvent, EventSource};

use crate::decoder::LogDecoder;
use crate::fetcher::{EvmFetcher, LogFilter};

/// EVM ledger client. Cheap to clone; clones share the RPC connection and
/// timestamp cache.
#[derive(Clone)]
pub struct EvmLedgerClient {
    fetcher: EvmFetcher,
    decoder: Arc<LogDecoder>,
    confirmation_depth: u64,
    poll_interval: Duration,
}

impl std::fmt::Debug for EvmLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmLedgerClient")
            .field("decoder", &self.decoder)
            .field("confirmation_depth", &self.confirmation_depth)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl EvmLedgerClient {
    pub fn new(
        fetcher: EvmFetcher,
        decoder: LogDecoder,
        confirmation_depth: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            decoder: Arc::new(decoder),
            confirmation_depth,
            poll_interval,
        }
    }

    pub fn confirmation_depth(&self) -> u64 {
        self.confirmation_depth
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Sources this client can decode.
    pub fn sources(&self) -> Vec<EventSource> {
        self.decoder.sources().cloned().collect()
    }

    fn filter(&self, source: &EventSource, from: u64, to: u64) -> Result<LogFilter, IndexerError> {
        let abi = self.decoder.abi(source).ok_or_else(|| {
            IndexerError::Config(format!("source {source} is not registered with the EVM client"))
        })?;
        Ok(LogFilter {
            address: source.id(),
            topic0: abi.selectors().iter().map(|s| format!("{s:#x}")).collect(),
            from_block: from,
            to_block: to,
        })
    }

    /// Confirmed head: the highest block considered final.
    async fn confirmed_head(&self) -> Result<u64, IndexerError> {
        let head = self.fetcher.head_block_number().await?;
        Ok(head.saturating_sub(self.confirmation_depth))
    }

    /// Events in `[next, confirmed head]`, or `None` when nothing new is
    /// confirmed yet.
    async fn poll_once(
        &self,
        source: &EventSource,
        next: u64,
    ) -> Result<Option<(Vec<ChainEvent>, u64)>, IndexerError> {
        let confirmed = self.confirmed_head().await?;
        if confirmed < next {
            return Ok(None);
        }
        let events = self.get_logs(source, next, confirmed).await?;
        Ok(Some((events, confirmed)))
    }

    async fn poll_loop(self, source: EventSource, from_block: u64, sink: BatchSink) {
        let mut next = from_block;
        loop {
            match self.poll_once(&source, next).await {
                Ok(Some((events, through_block))) => {
                    tracing::debug!(
                        source = %source,
                        from = next,
                        through_block,
                        events = events.len(),
                        "Live poll"
                    );
                    let batch = LiveBatch {
                        source: source.clone(),
                        events,
                        through_block,
                    };
                    if sink.send(LiveMessage::Batch(batch)).await.is_err() {
                        return; // engine gone
                    }
                    next = through_block + 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Live poll failed, closing subscription");
                    let _ = sink
                        .send(LiveMessage::Closed {
                            source: source.clone(),
                            reason: e.to_string(),
                        })
                        .await;
                    return;
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    async fn current_height(&self) -> Result<u64, IndexerError> {
        self.fetcher.head_block_number().await
    }

    async fn get_logs(
        &self,
        source: &EventSource,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainEvent>, IndexerError> {
        let filter = self.filter(source, from, to)?;
        let raw = self.fetcher.logs(&filter).await?;

        let mut keyed = Vec::with_capacity(raw.len());
        let mut blocks = BTreeSet::new();
        for log in raw {
            if !source.matches_address(&log.address) {
                continue;
            }
            let block = log.block_number_u64()?;
            let index = log.log_index_u32()?;
            blocks.insert(block);
            keyed.push((block, index, log));
        }
        keyed.sort_by_key(|(block, index, _)| (*block, *index));

        let mut timestamps = HashMap::with_capacity(blocks.len());
        for block in blocks {
            timestamps.insert(block, self.fetcher.block_timestamp(block).await?);
        }

        let mut events = Vec::with_capacity(keyed.len());
        for (block, index, log) in keyed {
            let ts = timestamps.get(&block).copied().unwrap_or_default();
            match self.decoder.decode(source, &log, block, index, ts) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {
                    tracing::debug!(source = %source, block, index, "Skipping log with unknown topic0");
                }
                Err(e) => {
                    // The window must not be checkpointed past a log it could not read.
                    tracing::error!(
                        source = %source,
                        block,
                        index,
                        tx_hash = log.tx_hash.as_deref().unwrap_or_default(),
                        error = %e,
                        "Failed to decode log"
                    );
                    return Err(IndexerError::Decode(e));
                }
            }
        }
        Ok(events)
    }

    async fn subscribe(
        &self,
        source: &EventSource,
        from_block: u64,
        sink: BatchSink,
    ) -> Result<Subscription, IndexerError> {
        // Fail fast for sources this client cannot filter.
        self.filter(source, from_block, from_block)?;

        tracing::info!(
            source = %source,
            from_block,
            poll_ms = self.poll_interval.as_millis() as u64,
            "Opening polling subscription"
        );
        let task = tokio::spawn(self.clone().poll_loop(source.clone(), from_block, sink));
        Ok(Subscription::new(source.clone(), task))
    }
}
