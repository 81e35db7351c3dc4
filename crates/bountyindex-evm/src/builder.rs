//! Fluent builder for [`EvmLedgerClient`].
//!
//! # Example
//!
//! ```rust,no_run
//! use bountyindex_core::types::{EventSource, SourceKind};
//! use bountyindex_evm::EvmLedgerBuilder;
//!
//! # fn main() -> Result<(), bountyindex_core::error::IndexerError> {
//! let ledger = EvmLedgerBuilder::new()
//!     .rpc_url("https://rpc.example.org")
//!     .source(EventSource::new(SourceKind::Bounty, "0x3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b"))
//!     .confirmation_depth(12)
//!     .poll_interval_ms(2_000)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bountyindex_core::error::IndexerError;
use bountyindex_core::types::EventSource;

use crate::abi::SourceAbi;
use crate::client::EvmLedgerClient;
use crate::decoder::LogDecoder;
use crate::fetcher::{EvmFetcher, EvmRpcClient};
use crate::rpc::{HttpRpcClient, RetryConfig};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 2_000;

/// Fluent builder for `EvmLedgerClient`.
pub struct EvmLedgerBuilder {
    rpc_url: Option<String>,
    sources: Vec<(EventSource, Vec<String>)>,
    confirmation_depth: u64,
    poll_interval: Duration,
    max_block_range: u64,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl Default for EvmLedgerBuilder {
    fn default() -> Self {
        Self {
            rpc_url: None,
            sources: Vec::new(),
            confirmation_depth: 12,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EvmLedgerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the JSON-RPC endpoint.
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    /// Watch `source` with its default event ABI.
    pub fn source(self, source: EventSource) -> Self {
        self.source_with_events(source, Vec::new())
    }

    /// Watch `source`, overriding event signatures by name.
    pub fn source_with_events(mut self, source: EventSource, signatures: Vec<String>) -> Self {
        self.sources.push((source, signatures));
        self
    }

    /// Blocks behind head before a log is delivered to subscriptions.
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.confirmation_depth = depth;
        self
    }

    /// Set live mode polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval_ms(self, ms: u64) -> Self {
        self.poll_interval(Duration::from_millis(ms))
    }

    /// Set the largest block range requested per `eth_getLogs` call.
    pub fn max_block_range(mut self, blocks: u64) -> Self {
        self.max_block_range = blocks;
        self
    }

    /// Retries per JSON-RPC request on transport failures.
    pub fn request_retries(mut self, retries: u32) -> Self {
        self.retry.max_retries = retries;
        self
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build a client talking HTTP JSON-RPC to the configured endpoint.
    pub fn build(self) -> Result<EvmLedgerClient, IndexerError> {
        let url = self
            .rpc_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| IndexerError::Config("rpc_url is required".into()))?;
        let rpc = HttpRpcClient::new(url, self.retry.clone(), self.request_timeout)?;
        self.build_with_client(Arc::new(rpc))
    }

    /// Build a client over any `EvmRpcClient` implementation.
    pub fn build_with_client(
        self,
        rpc: Arc<dyn EvmRpcClient>,
    ) -> Result<EvmLedgerClient, IndexerError> {
        if self.sources.is_empty() {
            return Err(IndexerError::Config("at least one source is required".into()));
        }
        if self.max_block_range == 0 {
            return Err(IndexerError::Config("max_block_range must be > 0".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(IndexerError::Config("poll_interval must be > 0".into()));
        }

        let mut decoder = LogDecoder::new();
        for (source, signatures) in self.sources {
            if decoder.abi(&source).is_some() {
                return Err(IndexerError::Config(format!("duplicate source address {}", source.address)));
            }
            let abi = SourceAbi::with_overrides(source.kind, &signatures)?;
            decoder.register(source, abi);
        }

        Ok(EvmLedgerClient::new(
            EvmFetcher::new(rpc, self.max_block_range),
            decoder,
            self.confirmation_depth,
            self.poll_interval,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bountyindex_core::types::SourceKind;

    fn bounty() -> EventSource {
        EventSource::new(SourceKind::Bounty, "0x3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b")
    }

    #[test]
    fn builder_defaults() {
        let ledger = EvmLedgerBuilder::new()
            .rpc_url("http://127.0.0.1:8545")
            .source(bounty())
            .build()
            .unwrap();
        assert_eq!(ledger.confirmation_depth(), 12);
        assert_eq!(ledger.poll_interval(), Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
        assert_eq!(ledger.sources(), vec![bounty()]);
    }

    #[test]
    fn builder_custom() {
        let ledger = EvmLedgerBuilder::new()
            .rpc_url("http://127.0.0.1:8545")
            .source(bounty())
            .source(EventSource::new(SourceKind::Identity, "0x1d"))
            .confirmation_depth(3)
            .poll_interval_ms(250)
            .build()
            .unwrap();
        assert_eq!(ledger.confirmation_depth(), 3);
        assert_eq!(ledger.poll_interval(), Duration::from_millis(250));
        assert_eq!(ledger.sources().len(), 2);
    }

    #[test]
    fn missing_rpc_url_is_rejected() {
        let err = EvmLedgerBuilder::new().source(bounty()).build().unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(EvmLedgerBuilder::new().rpc_url("http://x").build().is_err());
        assert!(EvmLedgerBuilder::new()
            .rpc_url("http://x")
            .source(bounty())
            .max_block_range(0)
            .build()
            .is_err());
        assert!(EvmLedgerBuilder::new()
            .rpc_url("http://x")
            .source(bounty())
            .source(EventSource::new(SourceKind::Identity, "0x3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B3B"))
            .build()
            .is_err());
        assert!(EvmLedgerBuilder::new()
            .rpc_url("http://x")
            .source_with_events(bounty(), vec!["event Nope(".into()])
            .build()
            .is_err());
    }
}
