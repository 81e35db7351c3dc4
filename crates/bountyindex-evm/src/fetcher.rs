//! EVM log fetcher.
//!
//! Wraps an [`EvmRpcClient`] with range chunking for `eth_getLogs` and a
//! block timestamp cache, so both backfill windows and live polls can ask for
//! arbitrary ranges without tripping provider limits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use bountyindex_core::error::IndexerError;

/// Timestamps kept before the cache is flushed.
const TIMESTAMP_CACHE_LIMIT: usize = 4096;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, IndexerError> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u32(&self) -> Result<u32, IndexerError> {
        let idx = parse_hex_u64(&self.log_index)?;
        u32::try_from(idx)
            .map_err(|_| IndexerError::Rpc(format!("log index {idx} out of range")))
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// An `eth_getLogs` filter: one contract, any of the listed topic0 values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub topic0: Vec<String>,
    pub from_block: u64,
    pub to_block: u64,
}

impl LogFilter {
    pub fn to_params(&self) -> Value {
        json!({
            "address": self.address,
            "fromBlock": format!("{:#x}", self.from_block),
            "toBlock": format!("{:#x}", self.to_block),
            "topics": [self.topic0],
        })
    }

    fn with_range(&self, from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            ..self.clone()
        }
    }
}

/// Trait for fetching EVM data from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64, IndexerError>;

    /// `eth_getLogs` for a single range.
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError>;

    /// Timestamp of block `number`, `None` if the node does not know it.
    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError>;
}

/// Adds range chunking and timestamp caching on top of an `EvmRpcClient`.
#[derive(Clone)]
pub struct EvmFetcher {
    client: Arc<dyn EvmRpcClient>,
    max_block_range: u64,
    timestamps: Arc<Mutex<HashMap<u64, i64>>>,
}

impl EvmFetcher {
    pub fn new(client: Arc<dyn EvmRpcClient>, max_block_range: u64) -> Self {
        Self {
            client,
            max_block_range: max_block_range.max(1),
            timestamps: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch the current chain head block number.
    pub async fn head_block_number(&self) -> Result<u64, IndexerError> {
        self.client.block_number().await
    }

    /// Fetch all logs in the filter's range, split into chunks of at most
    /// `max_block_range` blocks. Removed logs are dropped.
    pub async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        if filter.to_block < filter.from_block {
            return Ok(vec![]);
        }

        let mut all = Vec::new();
        let mut start = filter.from_block;
        loop {
            let end = start
                .saturating_add(self.max_block_range - 1)
                .min(filter.to_block);
            let chunk = self.client.get_logs(&filter.with_range(start, end)).await?;
            all.extend(chunk.into_iter().filter(|log| !log.is_removed()));
            if end >= filter.to_block {
                break;
            }
            start = end + 1;
        }
        Ok(all)
    }

    /// Timestamp of block `number`, cached after the first lookup.
    pub async fn block_timestamp(&self, number: u64) -> Result<i64, IndexerError> {
        if let Some(ts) = self.cached(number) {
            return Ok(ts);
        }
        let ts = self
            .client
            .block_timestamp(number)
            .await?
            .ok_or_else(|| IndexerError::Rpc(format!("block {number} not found")))?;

        if let Ok(mut cache) = self.timestamps.lock() {
            if cache.len() >= TIMESTAMP_CACHE_LIMIT {
                cache.clear();
            }
            cache.insert(number, ts);
        }
        Ok(ts)
    }

    fn cached(&self, number: u64) -> Option<i64> {
        self.timestamps
            .lock()
            .ok()
            .and_then(|cache| cache.get(&number).copied())
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, IndexerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| IndexerError::Rpc(format!("invalid hex quantity '{s}': {e}")))
}
