//! Integration tests for the pass coordinator
//!
//! Tests cover:
//! - Idempotent re-runs and union of split ranges
//! - Deal/grant lifecycle guards and write-once tables
//! - Rollback on decode failure, projection gaps, rebuild
//!
//! Logs are produced by encoding events with the bundled interface descriptions and served
//! by a scripted node; the in-memory store stands in for PostgreSQL.

use async_trait::async_trait;
use deal_ledger_indexer::contracts::KnownContract;
use deal_ledger_indexer::fetcher::LogSource;
use deal_ledger_indexer::projector::DealStatus;
use deal_ledger_indexer::store::memory::{LedgerState, MemoryStore};
use deal_ledger_indexer::types::conversions::h256_to_string;
use deal_ledger_indexer::types::{BlockTag, RawLog};
use deal_ledger_indexer::{IndexerError, Pipeline, Result, SignatureRegistry};
use ethers::abi::Token;
use ethers::types::{Address, H256, U256};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const CHAIN_ID: u64 = 8453;

fn deal_engine() -> Address {
    Address::from_low_u64_be(0xde01)
}
fn vault() -> Address {
    Address::from_low_u64_be(0xde02)
}
fn router() -> Address {
    Address::from_low_u64_be(0xde03)
}
fn receipt_nft() -> Address {
    Address::from_low_u64_be(0xde04)
}

fn contracts() -> IndexMap<String, Address> {
    IndexMap::from([
        ("DealEngine".to_string(), deal_engine()),
        ("DeferredVault".to_string(), vault()),
        ("PayoutRouter".to_string(), router()),
        ("ReceiptNFT".to_string(), receipt_nft()),
    ])
}

fn registry() -> SignatureRegistry {
    SignatureRegistry::load(None, KnownContract::ALL.iter().map(|c| c.name())).unwrap()
}

fn uint(v: u64) -> Token {
    Token::Uint(U256::from(v))
}
fn addr(v: u64) -> Token {
    Token::Address(Address::from_low_u64_be(v))
}
fn bytes32(b: u8) -> Token {
    Token::FixedBytes(vec![b; 32])
}

/// Builds a chain of encoded logs in emission order.
struct ChainBuilder {
    registry: SignatureRegistry,
    logs: Vec<RawLog>,
    next_tx: u64,
}

impl ChainBuilder {
    fn new() -> Self {
        Self {
            registry: registry(),
            logs: Vec::new(),
            next_tx: 1,
        }
    }

    fn encode(&self, contract: &str, event: &str, values: &[Token]) -> (Vec<H256>, Vec<u8>) {
        let schema = self
            .registry
            .events_for(contract)
            .find(|s| s.name() == event)
            .unwrap_or_else(|| panic!("{contract} has no {event}"));
        schema.encode_log(values).unwrap()
    }

    /// Emit `event` of `contract` at `address` in its own transaction in `block`.
    fn emit(&mut self, block: u64, contract: &str, address: Address, event: &str, values: Vec<Token>) -> RawLog {
        let (topics, data) = self.encode(contract, event, &values);
        self.push(block, address, topics, data)
    }

    /// Emit `event` as the next log of the transaction that produced the previous log.
    fn emit_in_same_tx(&mut self, contract: &str, address: Address, event: &str, values: Vec<Token>) -> RawLog {
        let (topics, data) = self.encode(contract, event, &values);
        let previous = self.logs.last().cloned().expect("no transaction to extend");
        let log = RawLog {
            log_index: previous.log_index + 1,
            address,
            topics,
            data: data.into(),
            ..previous
        };
        self.logs.push(log.clone());
        log
    }

    fn push(&mut self, block: u64, address: Address, topics: Vec<H256>, data: Vec<u8>) -> RawLog {
        let in_block = self.logs.iter().filter(|l| l.block_number == block).count() as u64;
        let tx = self.next_tx;
        self.next_tx += 1;
        let log = RawLog {
            block_number: block,
            block_hash: H256::from_low_u64_be(0xb000 + block),
            transaction_hash: H256::from_low_u64_be(0x7000 + tx),
            transaction_index: in_block,
            log_index: in_block,
            address,
            topics,
            data: data.into(),
        };
        self.logs.push(log.clone());
        log
    }

    fn deal_created(&mut self, block: u64, deal: u64, amount: u64) {
        self.emit(
            block,
            "DealEngine",
            deal_engine(),
            "DealCreated",
            vec![uint(deal), addr(0x5a), addr(0xa7), addr(0x70), uint(amount), uint(1_800_000_000), bytes32(0x11)],
        );
    }

    fn deal_delivered(&mut self, block: u64, deal: u64) {
        self.emit(
            block,
            "DealEngine",
            deal_engine(),
            "DealDelivered",
            vec![uint(deal), bytes32(0xab), uint(1_700_000_000)],
        );
    }

    fn deal_settled(&mut self, block: u64, deal: u64) {
        self.emit(
            block,
            "DealEngine",
            deal_engine(),
            "DealSettled",
            vec![uint(deal), uint(950_000), uint(50_000)],
        );
    }

    fn grant_created(&mut self, block: u64, grant: u64, amount: u64) {
        self.emit(
            block,
            "DeferredVault",
            vault(),
            "GrantCreated",
            vec![uint(grant), addr(0x5a), addr(0xbe), addr(0x70), uint(amount), uint(1_900_000_000), bytes32(0x22)],
        );
    }

    fn payout(&mut self, block: u64, payout: u64, amount: u64) {
        self.emit(
            block,
            "PayoutRouter",
            router(),
            "PayoutExecuted",
            vec![uint(payout), bytes32(0xcd), addr(0x5a), addr(0x70), uint(amount), uint(3), uint(1_700_000_100)],
        );
    }

    fn source(&self, head: u64) -> ScriptedNode {
        ScriptedNode {
            head,
            logs: self.logs.clone(),
            head_requests: AtomicUsize::new(0),
        }
    }
}

/// A node that serves a fixed set of logs, newest first.
struct ScriptedNode {
    head: u64,
    logs: Vec<RawLog>,
    head_requests: AtomicUsize,
}

#[async_trait]
impl LogSource for ScriptedNode {
    async fn latest_block(&self) -> Result<u64> {
        self.head_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.head)
    }

    async fn get_logs(&self, address: Address, from_block: u64, to_block: u64) -> Result<Vec<RawLog>> {
        let mut logs: Vec<RawLog> = self
            .logs
            .iter()
            .filter(|l| l.address == address && (from_block..=to_block).contains(&l.block_number))
            .cloned()
            .collect();
        logs.sort_by_key(|l| std::cmp::Reverse(l.position()));
        Ok(logs)
    }
}

async fn run(node: &ScriptedNode, store: &MemoryStore, from: u64, to: u64) -> Result<deal_ledger_indexer::PassReport> {
    let registry = registry();
    Pipeline::new(CHAIN_ID, &registry, node, store)
        .run_pass(from, BlockTag::Number(to), &contracts())
        .await
}

fn sorted_events(state: &LedgerState) -> Vec<(u64, u64, u64, String)> {
    let mut events: Vec<_> = state
        .events
        .iter()
        .map(|e| (e.block_number, e.tx_index, e.log_index, e.tx_hash.clone()))
        .collect();
    events.sort();
    events
}

fn key(id: u64) -> (u64, U256) {
    (CHAIN_ID, U256::from(id))
}

fn mixed_history() -> ChainBuilder {
    let mut chain = ChainBuilder::new();
    chain.deal_created(10, 1, 500);
    chain.grant_created(10, 4, 9_000);
    chain.deal_delivered(12, 1);
    chain.payout(13, 2, 700);
    chain.deal_created(15, 2, 800);
    chain.deal_settled(18, 1);
    chain.emit(
        19,
        "DeferredVault",
        vault(),
        "GrantAttested",
        vec![uint(4), addr(0xa1), bytes32(0x33)],
    );
    chain.emit(
        20,
        "DeferredVault",
        vault(),
        "GrantWithdrawn",
        vec![uint(4), addr(0xbe), uint(9_000)],
    );
    chain.emit(
        21,
        "DealEngine",
        deal_engine(),
        "DealRefunded",
        vec![uint(2), uint(800)],
    );
    chain
}

/// Test that re-running the same range stores nothing new and changes no projection
#[tokio::test]
async fn test_rerun_is_idempotent() {
    let chain = mixed_history();
    let node = chain.source(30);
    let store = MemoryStore::new();

    let first = run(&node, &store, 0, 30).await.unwrap();
    assert_eq!(first.appended, 9);
    assert_eq!(first.duplicates, 0);
    let after_first = store.snapshot().await;

    let second = run(&node, &store, 0, 30).await.unwrap();
    assert_eq!(second.appended, 0);
    assert_eq!(second.duplicates, 9);
    assert_eq!(second.projected, 0);
    let after_second = store.snapshot().await;

    assert_eq!(after_first.events.len(), after_second.events.len());
    assert_eq!(after_first, after_second, "a duplicate pass must not touch any row");
}

/// Test that splitting a range at any point yields the same state as one pass
#[tokio::test]
async fn test_split_passes_match_single_pass() {
    let chain = mixed_history();
    let node = chain.source(30);

    let whole = MemoryStore::new();
    run(&node, &whole, 0, 30).await.unwrap();
    let expected = whole.snapshot().await;

    for split in [0, 10, 12, 17, 19, 25, 30] {
        let store = MemoryStore::new();
        run(&node, &store, 0, split).await.unwrap();
        run(&node, &store, split + 1, 30).await.unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.projections(), expected.projections(), "split at {split}");
        assert_eq!(sorted_events(&state), sorted_events(&expected), "split at {split}");
    }
}

/// Test the create → deliver → settle scenario for deal 7
#[tokio::test]
async fn test_deal_lifecycle_scenario() {
    let mut chain = ChainBuilder::new();
    chain.deal_created(100, 7, 1_000_000);
    chain.deal_delivered(101, 7);
    chain.deal_settled(102, 7);
    let node = chain.source(200);
    let store = MemoryStore::new();

    let report = run(&node, &store, 100, 102).await.unwrap();
    assert_eq!(report.projected, 3);
    assert_eq!(report.gaps, 0);

    let state = store.snapshot().await;
    let deal = &state.deals[&key(7)];
    assert_eq!(deal.amount, U256::zero());
    assert_eq!(deal.status, DealStatus::Settled);
    assert_eq!(deal.evidence_hash.as_deref(), Some("ab".repeat(32).as_str()));
    assert_eq!(deal.delivered_at, Some(U256::from(1_700_000_000u64)));

    let created = &state.events[0];
    assert_eq!(created.event_name, "DealCreated");
    assert_eq!(created.decoded["amount"], "1000000");
    assert_eq!(created.decoded["termsHash"], "11".repeat(32));
    assert_eq!(created.contract_address, format!("{:?}", deal_engine()));
}

/// Test that a late delivery never moves a settled deal backward
#[tokio::test]
async fn test_status_never_moves_backward() {
    let mut chain = ChainBuilder::new();
    chain.deal_created(1, 3, 400);
    chain.deal_settled(2, 3);
    chain.deal_delivered(3, 3);
    chain.emit(4, "DealEngine", deal_engine(), "DealRefunded", vec![uint(3), uint(400)]);
    let node = chain.source(10);
    let store = MemoryStore::new();

    let report = run(&node, &store, 0, 10).await.unwrap();
    assert_eq!(report.stale, 2);

    let deal = &store.snapshot().await.deals[&key(3)];
    assert_eq!(deal.status, DealStatus::Settled);
    assert!(deal.amount.is_zero());
    assert!(deal.evidence_hash.is_none());
}

/// Test that refunds zero the amount
#[tokio::test]
async fn test_refund_zeroes_amount() {
    let mut chain = ChainBuilder::new();
    chain.deal_created(1, 9, 123_456_789);
    chain.emit(2, "DealEngine", deal_engine(), "DealRefunded", vec![uint(9), uint(123_456_789)]);
    let node = chain.source(10);
    let store = MemoryStore::new();

    run(&node, &store, 0, 10).await.unwrap();
    let deal = &store.snapshot().await.deals[&key(9)];
    assert_eq!(deal.status, DealStatus::Refunded);
    assert_eq!(deal.amount, U256::zero());
}

/// Test that amounts beyond 64 bits survive projection
#[tokio::test]
async fn test_large_amounts_are_kept_exact() {
    let mut chain = ChainBuilder::new();
    let huge = U256::from_dec_str("340282366920938463463374607431768211457").unwrap();
    chain.emit(
        1,
        "DeferredVault",
        vault(),
        "GrantCreated",
        vec![uint(1), addr(1), addr(2), addr(3), Token::Uint(huge), uint(5), bytes32(1)],
    );
    let node = chain.source(5);
    let store = MemoryStore::new();

    run(&node, &store, 0, 5).await.unwrap();
    let state = store.snapshot().await;
    assert_eq!(state.grants[&key(1)].amount, huge);
    assert_eq!(
        state.events[0].decoded["amount"],
        "340282366920938463463374607431768211457"
    );
}

/// Test that a second payout with the same id keeps the first values
#[tokio::test]
async fn test_payouts_are_write_once() {
    let mut chain = ChainBuilder::new();
    chain.payout(5, 11, 1_000);
    chain.payout(6, 11, 2_000);
    let node = chain.source(10);
    let store = MemoryStore::new();

    let report = run(&node, &store, 0, 10).await.unwrap();
    assert_eq!(report.appended, 2);
    assert_eq!(report.projected, 1);
    assert_eq!(report.unchanged, 1);

    let state = store.snapshot().await;
    assert_eq!(state.payouts.len(), 1);
    assert_eq!(state.payouts[&key(11)].amount, U256::from(1_000));
    assert_eq!(state.events.len(), 2);
}

/// Test that a log with an unregistered first topic is skipped silently
#[tokio::test]
async fn test_unknown_signature_is_skipped() {
    let mut chain = ChainBuilder::new();
    chain.push(
        7,
        deal_engine(),
        vec![H256::repeat_byte(0xee), H256::from_low_u64_be(1)],
        vec![0u8; 32],
    );
    chain.push(8, deal_engine(), vec![], vec![1, 2, 3]);
    let node = chain.source(10);
    let store = MemoryStore::new();

    let report = run(&node, &store, 0, 10).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.appended, 0);

    let state = store.snapshot().await;
    assert!(state.events.is_empty());
    assert!(state.deals.is_empty());
}

/// Test two passes over block 1000 holding a GrantCreated log
#[tokio::test]
async fn test_grant_created_twice_over_same_block() {
    let mut chain = ChainBuilder::new();
    chain.grant_created(1000, 42, 5_000);
    let node = chain.source(1000);
    let store = MemoryStore::new();

    run(&node, &store, 990, 1000).await.unwrap();
    let before = store.snapshot().await;

    let report = run(&node, &store, 1000, 1005).await.unwrap();
    assert_eq!(report.appended, 0);
    assert_eq!(report.duplicates, 1);

    let after = store.snapshot().await;
    assert_eq!(after.events.len(), 1);
    assert_eq!(after.grants, before.grants);
}

/// Test that a malformed payload aborts the pass and leaves the store untouched
#[tokio::test]
async fn test_decode_failure_rolls_back_whole_pass() {
    let mut chain = ChainBuilder::new();
    chain.deal_created(10, 1, 500);
    chain.payout(10, 5, 10);
    let mut broken = chain.emit(
        11,
        "DealEngine",
        deal_engine(),
        "DealDelivered",
        vec![uint(1), bytes32(0xab), uint(99)],
    );
    broken.data = broken.data.to_vec()[..16].to_vec().into();
    chain.logs.pop();
    chain.logs.push(broken.clone());
    let node = chain.source(20);
    let store = MemoryStore::new();

    let err = run(&node, &store, 0, 20).await.unwrap_err();
    match &err {
        IndexerError::AtLog {
            chain_id,
            tx_hash,
            log_index,
            source,
        } => {
            assert_eq!(*chain_id, CHAIN_ID);
            assert_eq!(tx_hash, &h256_to_string(broken.transaction_hash));
            assert_eq!(*log_index, broken.log_index);
            assert!(matches!(**source, IndexerError::Decode { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let state = store.snapshot().await;
    assert!(state.events.is_empty(), "no partial writes may survive");
    assert!(state.deals.is_empty());
    assert!(state.payouts.is_empty());
}

/// Test that an update without its create is recorded as a gap and the pass still commits
#[tokio::test]
async fn test_projection_gap_is_recorded() {
    let mut chain = ChainBuilder::new();
    chain.deal_settled(50, 77);
    let node = chain.source(60);
    let store = MemoryStore::new();

    let report = run(&node, &store, 40, 60).await.unwrap();
    assert_eq!(report.appended, 1);
    assert_eq!(report.gaps, 1);

    let state = store.snapshot().await;
    assert_eq!(state.events.len(), 1);
    assert!(state.deals.is_empty());
    assert_eq!(state.gaps.len(), 1);
    assert_eq!(state.gaps[0].entity, "deal");
    assert_eq!(state.gaps[0].entity_id, U256::from(77));
    assert_eq!(state.gaps[0].event_name, "DealSettled");
}

/// Test that rebuild closes a gap once the earlier range has been ingested
#[tokio::test]
async fn test_rebuild_after_backfill_closes_gap() {
    let mut chain = ChainBuilder::new();
    chain.deal_created(5, 8, 300);
    chain.deal_delivered(25, 8);
    let node = chain.source(30);
    let store = MemoryStore::new();
    let registry = registry();
    let pipeline = Pipeline::new(CHAIN_ID, &registry, &node, &store);

    // Later range first: delivery has nothing to update yet
    let late = pipeline.run_pass(20, BlockTag::Number(30), &contracts()).await.unwrap();
    assert_eq!(late.gaps, 1);

    pipeline.run_pass(0, BlockTag::Number(19), &contracts()).await.unwrap();
    assert_eq!(store.snapshot().await.deals[&key(8)].status, DealStatus::Funded);

    let rebuilt = pipeline.rebuild(&contracts()).await.unwrap();
    assert_eq!(rebuilt.fetched, 2);
    assert_eq!(rebuilt.gaps, 0);

    let state = store.snapshot().await;
    assert_eq!(state.deals[&key(8)].status, DealStatus::Delivered);
    assert!(state.gaps.is_empty());
    assert_eq!(state.events.len(), 2, "rebuild never touches the event log");
}

/// Test that rebuilding from the event log reproduces the projections
#[tokio::test]
async fn test_rebuild_reproduces_projections() {
    let chain = mixed_history();
    let node = chain.source(30);
    let store = MemoryStore::new();
    let registry = registry();
    let pipeline = Pipeline::new(CHAIN_ID, &registry, &node, &store);

    pipeline.run_pass(0, BlockTag::Number(30), &contracts()).await.unwrap();
    let before = store.snapshot().await;

    let report = pipeline.rebuild(&contracts()).await.unwrap();
    assert_eq!(report.fetched, before.events.len());
    assert_eq!(report.skipped, 0);

    let after = store.snapshot().await;
    assert_eq!(after.projections(), before.projections());
}

/// Test that rebuild skips rows of contracts that are no longer monitored
#[tokio::test]
async fn test_rebuild_skips_unmonitored_addresses() {
    let chain = mixed_history();
    let node = chain.source(30);
    let store = MemoryStore::new();
    let registry = registry();
    let pipeline = Pipeline::new(CHAIN_ID, &registry, &node, &store);
    pipeline.run_pass(0, BlockTag::Number(30), &contracts()).await.unwrap();

    let only_deals = IndexMap::from([("DealEngine".to_string(), deal_engine())]);
    let report = pipeline.rebuild(&only_deals).await.unwrap();
    assert_eq!(report.skipped, 4);

    let state = store.snapshot().await;
    assert_eq!(state.deals.len(), 2);
    assert!(state.grants.is_empty());
    assert!(state.payouts.is_empty());
}

/// Test that `latest` is resolved once per pass
#[tokio::test]
async fn test_latest_is_resolved_once() {
    let mut chain = ChainBuilder::new();
    chain.deal_created(40, 1, 10);
    chain.payout(60, 1, 10);
    let node = chain.source(50);
    let store = MemoryStore::new();
    let registry = registry();

    let report = Pipeline::new(CHAIN_ID, &registry, &node, &store)
        .run_pass(0, BlockTag::Latest, &contracts())
        .await
        .unwrap();
    assert_eq!(node.head_requests.load(Ordering::SeqCst), 1);
    assert_eq!(report.to_block, 50);
    assert_eq!(report.appended, 1);
}

/// Test grant attest-then-withdraw and the exclusive close flags
#[tokio::test]
async fn test_grant_closes_once() {
    let mut chain = ChainBuilder::new();
    chain.grant_created(1, 6, 1_000);
    chain.emit(2, "DeferredVault", vault(), "GrantAttested", vec![uint(6), addr(0xa1), bytes32(0x44)]);
    chain.emit(2, "DeferredVault", vault(), "GrantWithdrawn", vec![uint(6), addr(0xbe), uint(1_000)]);
    chain.emit(3, "DeferredVault", vault(), "GrantRefunded", vec![uint(6), addr(0x5a), uint(1_000)]);
    let node = chain.source(5);
    let store = MemoryStore::new();

    let report = run(&node, &store, 0, 5).await.unwrap();
    assert_eq!(report.stale, 1);

    let grant = &store.snapshot().await.grants[&key(6)];
    assert!(grant.attested);
    assert_eq!(grant.attestation_hash.as_deref(), Some("44".repeat(32).as_str()));
    assert!(grant.withdrawn);
    assert!(!grant.refunded);
    assert!(grant.amount.is_zero());
}

/// Test that events without a projection rule are still stored
#[tokio::test]
async fn test_unprojected_events_are_stored() {
    let mut chain = ChainBuilder::new();
    chain.emit(3, "ReceiptNFT", receipt_nft(), "Transfer", vec![addr(0), addr(0xb1), uint(1)]);
    chain.emit(
        3,
        "ReceiptNFT",
        receipt_nft(),
        "ReceiptMinted",
        vec![
            uint(1),
            bytes32(0x0f),
            addr(0xb1),
            addr(0x5e),
            addr(0x70),
            uint(5_000),
            uint(250),
            Token::String("ipfs://receipt/1".into()),
        ],
    );
    let node = chain.source(5);
    let store = MemoryStore::new();

    let report = run(&node, &store, 0, 5).await.unwrap();
    assert_eq!(report.appended, 2);
    assert_eq!(report.projected, 1);

    let state = store.snapshot().await;
    assert_eq!(state.events[0].event_name, "Transfer");
    assert_eq!(state.receipts[&key(1)].token_uri, "ipfs://receipt/1");
}

/// Test that a contract without an interface description is refused before any work
#[tokio::test]
async fn test_unknown_contract_is_a_config_error() {
    let node = ChainBuilder::new().source(5);
    let store = MemoryStore::new();
    let registry = registry();
    let mut monitored = contracts();
    monitored.insert("Escrow".to_string(), Address::from_low_u64_be(0xe5));

    let err = Pipeline::new(CHAIN_ID, &registry, &node, &store)
        .run_pass(0, BlockTag::Number(5), &monitored)
        .await
        .unwrap_err();
    assert!(err.is_startup_error());
    assert_eq!(node.head_requests.load(Ordering::SeqCst), 0);
}

/// Test that logs sharing a transaction are applied in log index order even when the node
/// returns them reversed
#[tokio::test]
async fn test_same_transaction_logs_apply_in_log_index_order() {
    let mut chain = ChainBuilder::new();
    chain.grant_created(1, 12, 4_000);
    let attested = chain.emit(
        2,
        "DeferredVault",
        vault(),
        "GrantAttested",
        vec![uint(12), addr(0xa1), bytes32(0x55)],
    );
    let withdrawn = chain.emit_in_same_tx(
        "DeferredVault",
        vault(),
        "GrantWithdrawn",
        vec![uint(12), addr(0xbe), uint(4_000)],
    );
    assert_eq!(attested.transaction_hash, withdrawn.transaction_hash);
    assert_eq!(withdrawn.log_index, attested.log_index + 1);

    let node = chain.source(5);
    let served = node.get_logs(vault(), 0, 5).await.unwrap();
    assert_eq!(served[0].log_index, withdrawn.log_index, "node serves newest first");

    let store = MemoryStore::new();
    let report = run(&node, &store, 0, 5).await.unwrap();
    assert_eq!(report.projected, 3);
    assert_eq!(report.stale, 0);

    let state = store.snapshot().await;
    let grant = &state.grants[&key(12)];
    assert!(grant.attested, "attestation precedes the withdrawal in the same transaction");
    assert_eq!(grant.attestation_hash.as_deref(), Some("55".repeat(32).as_str()));
    assert!(grant.withdrawn);
    assert!(grant.amount.is_zero());

    let names: Vec<_> = state.events.iter().map(|e| e.event_name.as_str()).collect();
    assert_eq!(names, vec!["GrantCreated", "GrantAttested", "GrantWithdrawn"]);
}

/// Test that an attestation arriving after the grant closed leaves the grant untouched
#[tokio::test]
async fn test_attestation_after_close_is_stale() {
    let mut chain = ChainBuilder::new();
    chain.grant_created(1, 13, 2_500);
    chain.emit(2, "DeferredVault", vault(), "GrantRefunded", vec![uint(13), addr(0x5a), uint(2_500)]);
    chain.emit(3, "DeferredVault", vault(), "GrantAttested", vec![uint(13), addr(0xa1), bytes32(0x66)]);
    let node = chain.source(5);
    let store = MemoryStore::new();

    let report = run(&node, &store, 0, 5).await.unwrap();
    assert_eq!(report.appended, 3);
    assert_eq!(report.stale, 1);

    let grant = &store.snapshot().await.grants[&key(13)];
    assert!(grant.refunded);
    assert!(!grant.attested);
    assert!(grant.attestation_hash.is_none());
}
