//! Shared types for the sync pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IndexerError;

// ─── EventKey ─────────────────────────────────────────────────────────────────

/// Global ordering key of a log: `(block_number, log_index)`.
///
/// Block number and log index are global to the chain, so keys compare
/// across sources and form a total order over every event ever emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub block_number: u64,
    pub log_index: u32,
}

impl EventKey {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    /// The smallest possible key; every real event sorts after it.
    pub const ZERO: EventKey = EventKey {
        block_number: 0,
        log_index: 0,
    };
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

// ─── Sources ──────────────────────────────────────────────────────────────────

/// The kind of contract a source is. Decides which events the router knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Agent identity registry (registration, metadata, wallet).
    Identity,
    /// Reputation registry.
    Reputation,
    /// Bounty board / escrow.
    Bounty,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [Self::Identity, Self::Reputation, Self::Bounty];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Reputation => "reputation",
            Self::Bounty => "bounty",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "reputation" => Ok(Self::Reputation),
            "bounty" => Ok(Self::Bounty),
            other => Err(IndexerError::Config(format!("unknown source kind '{other}'"))),
        }
    }
}

/// One event source: a contract address of a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSource {
    pub kind: SourceKind,
    /// Contract address (`0x…`).
    pub address: String,
}

impl EventSource {
    pub fn new(kind: SourceKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }

    /// Stable identifier used for per-source bookkeeping (lowercased address).
    pub fn id(&self) -> String {
        self.address.to_ascii_lowercase()
    }

    /// Returns `true` if `address` is this source's contract (case-insensitive).
    pub fn matches_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.address)
    }
}

// ─── ChainEvent ───────────────────────────────────────────────────────────────

/// A decoded log. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// The kind of source this log was fetched for.
    pub source: SourceKind,
    /// Emitting contract address.
    pub contract: String,
    /// Event name (e.g. `"BountyCreated"`).
    pub event_name: String,
    /// Decoded arguments, name → value.
    pub args: serde_json::Map<String, serde_json::Value>,
    pub block_number: u64,
    /// Log index, unique within its block.
    pub log_index: u32,
    /// Unix timestamp of the block (seconds).
    pub block_timestamp: i64,
    pub tx_hash: String,
}

impl ChainEvent {
    pub fn key(&self) -> EventKey {
        EventKey::new(self.block_number, self.log_index)
    }

    /// Full payload as JSON, for anomaly and decode-error logs.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ─── IndexPhase ───────────────────────────────────────────────────────────────

/// The phase an event was applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexPhase {
    /// Catching up to the confirmed head (historical windows).
    Backfill,
    /// Following confirmed logs pushed by subscriptions.
    Live,
}

impl fmt::Display for IndexPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backfill => write!(f, "backfill"),
            Self::Live => write!(f, "live"),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
