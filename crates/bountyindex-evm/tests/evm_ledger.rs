//! EVM ledger client against a scripted JSON-RPC node.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::mpsc;

use bountyindex_core::checkpoint::{CheckpointStore, DEFAULT_CHECKPOINT_KEY};
use bountyindex_core::error::IndexerError;
use bountyindex_core::indexer::SyncConfigBuilder;
use bountyindex_core::ledger::{LedgerClient, LiveMessage};
use bountyindex_core::projection::ProjectionStore;
use bountyindex_core::sync::SyncEngine;
use bountyindex_core::types::{EventSource, SourceKind};
use bountyindex_evm::{EvmLedgerBuilder, EvmLedgerClient, EvmRpcClient, LogFilter, RawLog};
use bountyindex_storage::InMemoryStorage;

const IDENTITY: &str = "0x1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d1d";
const BOUNTY: &str = "0x3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b3b";

// ─── Scripted node ───────────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedNode {
    height: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    failing: AtomicBool,
}

impl ScriptedNode {
    fn push(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }
}

#[async_trait]
impl EvmRpcClient for ScriptedNode {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IndexerError::Rpc("node unreachable".into()));
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|log| log.address.eq_ignore_ascii_case(&filter.address))
            .filter(|log| {
                let block = log.block_number_u64().unwrap();
                block >= filter.from_block && block <= filter.to_block
            })
            .filter(|log| log.topics.first().is_some_and(|t| filter.topic0.contains(t)))
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, IndexerError> {
        Ok(Some(1_700_000_000 + number as i64 * 12))
    }
}

// ─── Log encoding ────────────────────────────────────────────────────────────

fn selector(sig: &str) -> String {
    format!("{:#x}", keccak256(sig))
}

fn word(n: u64) -> String {
    format!("{:#x}", B256::from(U256::from(n).to_be_bytes::<32>()))
}

fn raw(address: &str, block: u64, index: u64, topics: Vec<String>, data: Vec<u8>) -> RawLog {
    RawLog {
        address: address.into(),
        topics,
        data: format!("0x{}", hex::encode(data)),
        block_number: format!("{block:#x}"),
        block_hash: Some(format!("{:#x}", B256::repeat_byte(block as u8))),
        tx_hash: Some(format!("0x{block:060x}{index:04x}")),
        log_index: format!("{index:#x}"),
        removed: Some(false),
    }
}

fn registered(block: u64, index: u64, agent_id: u64) -> RawLog {
    let owner = Address::repeat_byte(agent_id as u8);
    raw(
        IDENTITY,
        block,
        index,
        vec![
            selector("Registered(uint256,string,address)"),
            word(agent_id),
            format!("{:#x}", owner.into_word()),
        ],
        DynSolValue::Tuple(vec![DynSolValue::String(format!("ipfs://agent/{agent_id}"))])
            .abi_encode_params(),
    )
}

fn bounty_created(block: u64, index: u64, bounty_id: u64, creator_id: u64, reward: u128) -> RawLog {
    raw(
        BOUNTY,
        block,
        index,
        vec![
            selector("BountyCreated(uint256,uint256,uint256,address,uint256,string)"),
            word(bounty_id),
            word(creator_id),
        ],
        DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(reward), 256),
            DynSolValue::Address(Address::ZERO),
            DynSolValue::Uint(U256::from(1_800_000_000u64), 256),
            DynSolValue::String(format!("ipfs://bounty/{bounty_id}")),
        ])
        .abi_encode_params(),
    )
}

fn bounty_claimed(block: u64, index: u64, bounty_id: u64, hunter_id: u64) -> RawLog {
    raw(
        BOUNTY,
        block,
        index,
        vec![selector("BountyClaimed(uint256,uint256)"), word(bounty_id), word(hunter_id)],
        vec![],
    )
}

fn identity() -> EventSource {
    EventSource::new(SourceKind::Identity, IDENTITY)
}

fn bounty_board() -> EventSource {
    EventSource::new(SourceKind::Bounty, BOUNTY)
}

fn ledger(node: Arc<ScriptedNode>, depth: u64) -> EvmLedgerClient {
    EvmLedgerBuilder::new()
        .source(identity())
        .source(bounty_board())
        .confirmation_depth(depth)
        .poll_interval_ms(5)
        .max_block_range(4)
        .build_with_client(node)
        .unwrap()
}

// ─── Historical queries ──────────────────────────────────────────────────────

#[tokio::test]
async fn get_logs_decodes_sorts_and_filters() {
    let node = Arc::new(ScriptedNode::default());
    node.push(bounty_claimed(9, 1, 1, 2));
    node.push(bounty_created(3, 0, 1, 1, 500));
    node.push(bounty_claimed(9, 0, 2, 3));
    let mut removed = bounty_claimed(4, 0, 5, 5);
    removed.removed = Some(true);
    node.push(removed);
    node.push(registered(5, 0, 1)); // other source

    let ledger = ledger(node, 0);
    let events = ledger.get_logs(&bounty_board(), 1, 10).await.unwrap();

    let keys: Vec<String> = events.iter().map(|e| e.key().to_string()).collect();
    assert_eq!(keys, vec!["3:0", "9:0", "9:1"]);

    let created = &events[0];
    assert_eq!(created.event_name, "BountyCreated");
    assert_eq!(created.args["reward"], 500);
    assert_eq!(created.args["deadline"], 1_800_000_000u64);
    assert_eq!(created.block_timestamp, 1_700_000_036);
    assert_eq!(events[1].args["hunterId"], 3);
}

#[tokio::test]
async fn unregistered_source_is_a_config_error() {
    let node = Arc::new(ScriptedNode::default());
    let ledger = ledger(node, 0);
    let stranger = EventSource::new(SourceKind::Reputation, "0x2e");
    let err = ledger.get_logs(&stranger, 0, 1).await.unwrap_err();
    assert!(matches!(err, IndexerError::Config(_)));
}

#[tokio::test]
async fn malformed_log_data_fails_the_range() {
    let node = Arc::new(ScriptedNode::default());
    node.push(bounty_created(3, 0, 1, 1, 500));
    let mut truncated = bounty_created(4, 0, 2, 1, 500);
    truncated.data = "0x00ff".into();
    node.push(truncated);

    let ledger = ledger(node, 0);
    let err = ledger.get_logs(&bounty_board(), 1, 10).await.unwrap_err();
    assert!(matches!(err, IndexerError::Decode(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn engine_keeps_checkpoint_before_undecodable_log() {
    let node = Arc::new(ScriptedNode::default());
    node.push(bounty_created(2, 0, 1, 1, 500));
    let mut bad = bounty_claimed(6, 0, 1, 2);
    bad.data = "0xzz".into();
    node.push(bad);
    node.height.store(20, Ordering::SeqCst);

    let store = Arc::new(InMemoryStorage::new());
    let config = SyncConfigBuilder::new()
        .confirmation_depth(0)
        .window_size(4)
        .to_block(10)
        .build()
        .unwrap();
    let mut engine = SyncEngine::new(
        config,
        vec![bounty_board()],
        Arc::new(ledger(node, 0)),
        store.clone(),
        store.clone(),
    )
    .unwrap();

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, IndexerError::Decode(_)));
    // Window [1, 4] committed; [5, 8] holds the bad log and stays pending.
    assert_eq!(
        store.get(DEFAULT_CHECKPOINT_KEY).await.unwrap().as_deref(),
        Some("4")
    );
    assert!(store.bounty(1).await.unwrap().is_some());
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn subscription_delivers_confirmed_batches_with_watermarks() {
    let node = Arc::new(ScriptedNode::default());
    node.push(bounty_created(5, 0, 1, 1, 10));
    node.push(bounty_claimed(9, 0, 1, 2));
    node.height.store(10, Ordering::SeqCst);

    let ledger = ledger(node.clone(), 2);
    let (tx, mut rx) = mpsc::channel(16);
    let sub = ledger.subscribe(&bounty_board(), 1, tx).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    let batch = match first {
        LiveMessage::Batch(batch) => batch,
        other => panic!("expected a batch, got {other:?}"),
    };
    assert_eq!(batch.through_block, 8);
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].block_number, 5);

    node.height.store(12, Ordering::SeqCst);
    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    let batch = match second {
        LiveMessage::Batch(batch) => batch,
        other => panic!("expected a batch, got {other:?}"),
    };
    assert_eq!(batch.through_block, 10);
    assert_eq!(batch.events[0].event_name, "BountyClaimed");

    assert!(sub.is_active());
    sub.cancel();
}

#[tokio::test]
async fn subscription_reports_closed_on_node_failure() {
    let node = Arc::new(ScriptedNode::default());
    node.height.store(3, Ordering::SeqCst);
    node.failing.store(true, Ordering::SeqCst);

    let ledger = ledger(node, 0);
    let (tx, mut rx) = mpsc::channel(4);
    let _sub = ledger.subscribe(&identity(), 1, tx).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    match msg {
        LiveMessage::Closed { source, reason } => {
            assert_eq!(source, identity());
            assert!(reason.contains("node unreachable"));
        }
        other => panic!("expected Closed, got {other:?}"),
    }
}

// ─── Engine over the EVM client ──────────────────────────────────────────────

#[tokio::test]
async fn engine_backfills_from_evm_logs() {
    let node = Arc::new(ScriptedNode::default());
    node.push(registered(2, 0, 7));
    node.push(bounty_created(3, 0, 1, 7, 250));
    node.push(bounty_claimed(6, 0, 1, 7));
    node.height.store(20, Ordering::SeqCst);

    let store = Arc::new(InMemoryStorage::new());
    let config = SyncConfigBuilder::new()
        .confirmation_depth(0)
        .window_size(3)
        .to_block(10)
        .build()
        .unwrap();
    let mut engine = SyncEngine::new(
        config,
        vec![identity(), bounty_board()],
        Arc::new(ledger(node, 0)),
        store.clone(),
        store.clone(),
    )
    .unwrap();

    let stats = engine.run().await.unwrap();
    assert_eq!(stats.events, 3);
    assert_eq!(stats.checkpoint, Some(10));

    let agent = store.agent(7).await.unwrap().unwrap();
    assert_eq!(agent.owner.as_deref(), Some(format!("0x{}", "07".repeat(20)).as_str()));
    assert_eq!(agent.token_uri.as_deref(), Some("ipfs://agent/7"));

    let bounty = store.bounty(1).await.unwrap().unwrap();
    assert_eq!(bounty.reward, Some(250));
    assert_eq!(bounty.hunter_id, Some(7));
}
