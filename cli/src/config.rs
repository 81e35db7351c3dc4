//! YAML configuration for the `bountyindex` binary.
//!
//! ```yaml
//! rpc_url: https://rpc.example.org
//! database: ./bountyindex.db
//! poll_interval_ms: 2000
//! sync:
//!   start_block: 5000000
//!   confirmation_depth: 12
//! sources:
//!   - kind: identity
//!     address: "0x1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d"
//!   - kind: bounty
//!     address: "0x3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b"
//!     events:
//!       - "event BountyApproved(uint256 indexed bountyId, uint8 rating, string feedbackURI)"
//! log:
//!   level: info
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use bountyindex_core::indexer::SyncConfig;
use bountyindex_core::types::{EventSource, SourceKind};
use bountyindex_evm::builder::{DEFAULT_MAX_BLOCK_RANGE, DEFAULT_POLL_INTERVAL_MS};
use bountyindex_evm::EvmLedgerBuilder;

use crate::logging::LogConfig;

/// One watched contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub address: String,
    /// Event signature overrides, matched to the defaults by event name.
    #[serde(default)]
    pub events: Vec<String>,
}

impl SourceConfig {
    pub fn source(&self) -> EventSource {
        EventSource::new(self.kind, self.address.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_database() -> String {
    "bountyindex.db".into()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_block_range() -> u64 {
    DEFAULT_MAX_BLOCK_RANGE
}

fn default_request_retries() -> u32 {
    3
}

impl AppConfig {
    /// Read and parse a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply command-line / environment overrides.
    pub fn apply_overrides(&mut self, rpc_url: Option<String>, database: Option<String>) {
        if let Some(url) = rpc_url {
            self.rpc_url = Some(url);
        }
        if let Some(db) = database {
            self.database = db;
        }
    }

    /// Checks needed before the engine can run.
    pub fn validate_for_run(&self) -> Result<()> {
        if self.rpc_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            bail!("rpc_url is not set (config file or BOUNTYINDEX_RPC_URL)");
        }
        if self.sources.is_empty() {
            bail!("no sources configured");
        }
        self.sync.validate()?;
        Ok(())
    }

    pub fn event_sources(&self) -> Vec<EventSource> {
        self.sources.iter().map(SourceConfig::source).collect()
    }

    /// EVM ledger builder populated from this config.
    pub fn ledger_builder(&self) -> EvmLedgerBuilder {
        let mut builder = EvmLedgerBuilder::new()
            .confirmation_depth(self.sync.confirmation_depth)
            .poll_interval_ms(self.poll_interval_ms)
            .max_block_range(self.max_block_range)
            .request_retries(self.request_retries);
        if let Some(url) = &self.rpc_url {
            builder = builder.rpc_url(url.clone());
        }
        for source in &self.sources {
            builder = builder.source_with_events(source.source(), source.events.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
rpc_url: http://127.0.0.1:8545
database: /tmp/bounties.db
sync:
  start_block: 100
  confirmation_depth: 3
sources:
  - kind: identity
    address: "0x1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d"
  - kind: bounty
    address: "0x3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b"
    events:
      - "event BountyApproved(uint256 indexed bountyId, uint8 rating, string feedbackURI)"
log:
  level: debug
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.rpc_url.as_deref(), Some("http://127.0.0.1:8545"));
        assert_eq!(config.sync.start_block, 100);
        assert_eq!(config.sync.confirmation_depth, 3);
        // Unspecified sync fields keep their defaults.
        assert_eq!(config.sync.window_size, 1000);
        assert_eq!(config.sync.checkpoint_key, "indexer:lastBlock");
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].kind, SourceKind::Identity);
        assert_eq!(config.sources[1].events.len(), 1);
        assert_eq!(config.log.level, "debug");
        assert!(config.validate_for_run().is_ok());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.apply_overrides(Some("https://other".into()), None);
        assert_eq!(config.rpc_url.as_deref(), Some("https://other"));
        assert_eq!(config.database, "/tmp/bounties.db");
    }

    #[test]
    fn run_requires_rpc_url_and_sources() {
        let config = AppConfig::from_yaml("database: x.db").unwrap();
        assert!(config.validate_for_run().is_err());

        let config = AppConfig::from_yaml("rpc_url: http://x").unwrap();
        assert!(config.validate_for_run().is_err());
    }

    #[test]
    fn unknown_source_kind_is_rejected() {
        let yaml = "sources:\n  - kind: escrow\n    address: \"0x01\"\n";
        assert!(AppConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn ledger_builder_uses_config() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        let ledger = config.ledger_builder().build().unwrap();
        assert_eq!(ledger.confirmation_depth(), 3);
        assert_eq!(ledger.sources().len(), 2);
    }
}
