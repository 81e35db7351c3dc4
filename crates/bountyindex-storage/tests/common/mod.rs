#![allow(dead_code)]

use serde_json::{json, Value};

use bountyindex_core::types::{ChainEvent, EventSource, SourceKind};

pub const IDENTITY: &str = "0x1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d";
pub const REPUTATION: &str = "0x2e2e2e2e2e2e2e2e2e2e2e2e2e2e2e2e2e2e2e2e";
pub const BOUNTY: &str = "0x3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b";

pub fn identity() -> EventSource {
    EventSource::new(SourceKind::Identity, IDENTITY)
}

pub fn reputation() -> EventSource {
    EventSource::new(SourceKind::Reputation, REPUTATION)
}

pub fn bounty_board() -> EventSource {
    EventSource::new(SourceKind::Bounty, BOUNTY)
}

pub fn all_sources() -> Vec<EventSource> {
    vec![identity(), reputation(), bounty_board()]
}

pub fn log(source: &EventSource, name: &str, block: u64, log_index: u32, args: Value) -> ChainEvent {
    ChainEvent {
        source: source.kind,
        contract: source.address.clone(),
        event_name: name.into(),
        args: args.as_object().cloned().unwrap_or_default(),
        block_number: block,
        log_index,
        block_timestamp: 1_700_000_000 + block as i64 * 12,
        tx_hash: format!("0x{block:060x}{log_index:04x}"),
    }
}

// ─── Event builders ──────────────────────────────────────────────────────────

pub fn registered(block: u64, idx: u32, agent_id: u64) -> ChainEvent {
    log(
        &identity(),
        "Registered",
        block,
        idx,
        json!({
            "agentId": agent_id,
            "tokenURI": format!("ipfs://agent/{agent_id}"),
            "owner": format!("0x{agent_id:040x}"),
        }),
    )
}

pub fn metadata(block: u64, idx: u32, agent_id: u64, key: &str, value: &[u8]) -> ChainEvent {
    log(
        &identity(),
        "MetadataSet",
        block,
        idx,
        json!({"agentId": agent_id, "key": key, "value": format!("0x{}", hex_encode(value))}),
    )
}

pub fn reputation_updated(block: u64, idx: u32, agent_id: u64, score: u64) -> ChainEvent {
    log(
        &reputation(),
        "ReputationUpdated",
        block,
        idx,
        json!({"agentId": agent_id, "score": score}),
    )
}

pub fn bounty_created(block: u64, idx: u32, bounty_id: u64, creator_id: u64, reward: u128) -> ChainEvent {
    log(
        &bounty_board(),
        "BountyCreated",
        block,
        idx,
        json!({
            "bountyId": bounty_id,
            "creatorId": creator_id,
            "reward": reward.to_string(),
            "token": "0x0000000000000000000000000000000000000000",
            "deadline": 1_800_000_000u64,
            "metadataURI": format!("ipfs://bounty/{bounty_id}"),
        }),
    )
}

pub fn bounty_claimed(block: u64, idx: u32, bounty_id: u64, hunter_id: u64) -> ChainEvent {
    log(
        &bounty_board(),
        "BountyClaimed",
        block,
        idx,
        json!({"bountyId": bounty_id, "hunterId": hunter_id}),
    )
}

pub fn work_submitted(block: u64, idx: u32, bounty_id: u64, hunter_id: u64) -> ChainEvent {
    log(
        &bounty_board(),
        "WorkSubmitted",
        block,
        idx,
        json!({
            "bountyId": bounty_id,
            "hunterId": hunter_id,
            "submissionURI": format!("ipfs://work/{bounty_id}"),
        }),
    )
}

pub fn bounty_approved(block: u64, idx: u32, bounty_id: u64, rating: u8) -> ChainEvent {
    log(
        &bounty_board(),
        "BountyApproved",
        block,
        idx,
        json!({"bountyId": bounty_id, "rating": rating, "feedbackURI": "ipfs://feedback"}),
    )
}

/// Amounts are passed as decimal strings, the way wide uints arrive from the decoder.
pub fn bounty_paid(block: u64, idx: u32, bounty_id: u64, hunter_id: u64, amount: u128) -> ChainEvent {
    log(
        &bounty_board(),
        "BountyPaid",
        block,
        idx,
        json!({"bountyId": bounty_id, "hunterId": hunter_id, "amount": amount.to_string()}),
    )
}

pub fn bounty_completed(block: u64, idx: u32, bounty_id: u64, agent_id: u64, reward: u128) -> ChainEvent {
    log(
        &bounty_board(),
        "BountyCompleted",
        block,
        idx,
        json!({"bountyId": bounty_id, "agentId": agent_id, "reward": reward.to_string()}),
    )
}

pub fn bounty_status(block: u64, idx: u32, name: &str, bounty_id: u64) -> ChainEvent {
    log(&bounty_board(), name, block, idx, json!({"bountyId": bounty_id}))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
