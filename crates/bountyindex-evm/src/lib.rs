//! bountyindex-evm: EVM JSON-RPC ledger client for BountyIndex.
//!
//! - [`rpc`]: HTTP JSON-RPC transport with retry
//! - [`fetcher`]: `eth_getLogs` range chunking, block timestamps
//! - [`abi`] / [`decoder`]: event signatures and log decoding
//! - [`client`]: the [`LedgerClient`](bountyindex_core::ledger::LedgerClient) implementation
//! - [`builder`]: fluent construction

pub mod abi;
pub mod builder;
pub mod client;
pub mod decoder;
pub mod fetcher;
pub mod rpc;

pub use abi::SourceAbi;
pub use builder::EvmLedgerBuilder;
pub use client::EvmLedgerClient;
pub use decoder::LogDecoder;
pub use fetcher::{EvmFetcher, EvmRpcClient, LogFilter, RawLog};
pub use rpc::{HttpRpcClient, RetryConfig};
