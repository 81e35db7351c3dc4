//! Event ABIs per source kind.
//!
//! Each source kind ships a default set of human-readable event signatures.
//! A deployment whose contracts emit slightly different shapes can override
//! individual events by name; everything else keeps the default.

use std::collections::HashMap;

use alloy_json_abi::Event;
use alloy_primitives::B256;

use bountyindex_core::error::IndexerError;
use bountyindex_core::types::SourceKind;

const IDENTITY_EVENTS: &[&str] = &[
    "event Registered(uint256 indexed agentId, string tokenURI, address indexed owner)",
    "event MetadataSet(uint256 indexed agentId, string key, bytes value)",
    "event AgentWalletSet(uint256 indexed agentId, address wallet)",
];

const REPUTATION_EVENTS: &[&str] = &[
    "event ReputationUpdated(uint256 indexed agentId, uint256 score)",
];

const BOUNTY_EVENTS: &[&str] = &[
    "event BountyCreated(uint256 indexed bountyId, uint256 indexed creatorId, uint256 reward, address token, uint256 deadline, string metadataURI)",
    "event BountyClaimed(uint256 indexed bountyId, uint256 indexed hunterId)",
    "event WorkSubmitted(uint256 indexed bountyId, uint256 indexed hunterId, string submissionURI)",
    "event BountyApproved(uint256 indexed bountyId, uint8 rating, string feedbackURI)",
    "event BountyRejected(uint256 indexed bountyId)",
    "event BountyDisputed(uint256 indexed bountyId)",
    "event BountyCancelled(uint256 indexed bountyId)",
    "event BountyExpired(uint256 indexed bountyId)",
    "event BountyPaid(uint256 indexed bountyId, uint256 indexed hunterId, uint256 amount)",
    "event BountyCompleted(uint256 indexed bountyId, uint256 indexed agentId, uint256 reward)",
];

/// Default event signatures emitted by a contract of `kind`.
pub fn default_signatures(kind: SourceKind) -> &'static [&'static str] {
    match kind {
        SourceKind::Identity => IDENTITY_EVENTS,
        SourceKind::Reputation => REPUTATION_EVENTS,
        SourceKind::Bounty => BOUNTY_EVENTS,
    }
}

/// Parsed event ABIs of one source, indexed by topic0 selector.
#[derive(Debug, Clone)]
pub struct SourceAbi {
    events: HashMap<B256, Event>,
}

impl SourceAbi {
    /// The default ABI for `kind`.
    pub fn new(kind: SourceKind) -> Result<Self, IndexerError> {
        Self::with_overrides(kind, &[])
    }

    /// The default ABI for `kind`, with events of the same name replaced by
    /// the given signatures. Signatures naming events outside the defaults
    /// are added.
    pub fn with_overrides(kind: SourceKind, overrides: &[String]) -> Result<Self, IndexerError> {
        let mut by_name: HashMap<String, Event> = HashMap::new();
        for sig in default_signatures(kind) {
            let event = parse_signature(sig)?;
            by_name.insert(event.name.clone(), event);
        }
        for sig in overrides {
            let event = parse_signature(sig)?;
            tracing::debug!(kind = %kind, event = %event.name, "Overriding event signature");
            by_name.insert(event.name.clone(), event);
        }

        let events = by_name
            .into_values()
            .map(|event| (event.selector(), event))
            .collect();
        Ok(Self { events })
    }

    /// Event matching a log's topic0.
    pub fn event(&self, selector: &B256) -> Option<&Event> {
        self.events.get(selector)
    }

    /// All topic0 selectors, sorted, for the `eth_getLogs` topic filter.
    pub fn selectors(&self) -> Vec<B256> {
        let mut selectors: Vec<B256> = self.events.keys().copied().collect();
        selectors.sort();
        selectors
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn parse_signature(sig: &str) -> Result<Event, IndexerError> {
    let sig = sig.trim();
    let full = if sig.starts_with("event ") {
        sig.to_string()
    } else {
        format!("event {sig}")
    };
    Event::parse(&full)
        .map_err(|e| IndexerError::Config(format!("invalid event signature '{sig}': {e}")))
}
