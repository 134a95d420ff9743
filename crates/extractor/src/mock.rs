//! In-memory chain for tests.
use std::collections::{BTreeMap, HashMap};

use alloy::{
    primitives::{Address, B256, BlockHash, BlockNumber, Bytes, Log as PrimitiveLog, keccak256},
    sol_types::{SolCall, SolEvent},
};
use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use chainio::IScrollChain;
use eyre::{Result, bail, eyre};
use primitives::headers::BlockHeader;
use tokio::sync::Mutex;

use crate::ChainClient;

#[derive(Debug, Default)]
struct MockState {
    canonical: BTreeMap<BlockNumber, BlockHeader>,
    by_hash: HashMap<BlockHash, BlockHeader>,
    logs: Vec<Log>,
    inputs: HashMap<B256, Bytes>,
    failing: bool,
    failing_hash_lookups: bool,
}

impl MockState {
    fn push_block(&mut self, number: BlockNumber, salt: u8) -> BlockHeader {
        let parent_hash =
            number.checked_sub(1).and_then(|n| self.canonical.get(&n)).map_or(B256::ZERO, |h| h.hash);
        let mut preimage = number.to_be_bytes().to_vec();
        preimage.push(salt);
        preimage.extend_from_slice(parent_hash.as_slice());
        let header =
            BlockHeader { number, hash: keccak256(&preimage), parent_hash, timestamp: 1_000 + number * 12 };
        self.canonical.insert(number, header);
        self.by_hash.insert(header.hash, header);
        header
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.failing {
            bail!("connection refused");
        }
        Ok(())
    }
}

/// A chain whose canonical history is driven by the test.
///
/// Block 0 exists from the start. Headers of replaced branches stay reachable by hash, as on a
/// real node.
#[derive(Debug)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// Create a chain holding only block 0.
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.push_block(0, 0);
        Self { state: Mutex::new(state) }
    }

    /// Appends `count` blocks on top of the canonical tip. `salt` varies the block hashes so
    /// competing branches differ.
    pub async fn extend(&self, count: u64, salt: u8) -> Vec<BlockHeader> {
        let mut state = self.state.lock().await;
        let tip = state.canonical.keys().next_back().copied().unwrap_or_default();
        (tip + 1..=tip + count).map(|number| state.push_block(number, salt)).collect()
    }

    /// Replaces every canonical block from `from` on with `count` new blocks. Logs of the
    /// replaced blocks are dropped.
    pub async fn reorg_from(&self, from: BlockNumber, count: u64, salt: u8) -> Vec<BlockHeader> {
        let mut state = self.state.lock().await;
        state.canonical.retain(|number, _| *number < from);
        state.logs.retain(|log| log.block_number.is_some_and(|number| number < from));
        (from..from + count).map(|number| state.push_block(number, salt)).collect()
    }

    /// Canonical header at `number`.
    pub async fn header(&self, number: BlockNumber) -> Option<BlockHeader> {
        self.state.lock().await.canonical.get(&number).copied()
    }

    /// Adds an event emitted by `address` in transaction `tx_hash` of canonical block `number`.
    /// Log indexes are assigned in insertion order per block.
    pub async fn add_event<E: SolEvent>(
        &self,
        number: BlockNumber,
        tx_hash: B256,
        address: Address,
        event: &E,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let header =
            state.canonical.get(&number).copied().ok_or_else(|| eyre!("block {number} not found"))?;
        let log_index =
            state.logs.iter().filter(|log| log.block_number == Some(number)).count() as u64;
        let inner = PrimitiveLog { address, data: event.encode_log_data() };
        state.logs.push(Log {
            inner,
            block_hash: Some(header.hash),
            block_number: Some(number),
            block_timestamp: Some(header.timestamp),
            transaction_hash: Some(tx_hash),
            transaction_index: Some(0),
            log_index: Some(log_index),
            removed: false,
        });
        Ok(())
    }

    /// Sets the calldata returned for `tx_hash`.
    pub async fn set_transaction_input(&self, tx_hash: B256, input: Bytes) {
        self.state.lock().await.inputs.insert(tx_hash, input);
    }

    /// Makes every query fail until reset.
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }

    /// Makes only [`ChainClient::header_by_hash`] fail until reset.
    pub async fn set_hash_lookups_failing(&self, failing: bool) {
        self.state.lock().await.failing_hash_lookups = failing;
    }
}

/// `commitBatch` calldata committing `batch_index` over L2 blocks `start..=end`, one chunk per
/// block. `batch_index` must be at least 1.
pub fn commit_batch_calldata(batch_index: u64, start: u64, end: u64) -> Bytes {
    let mut parent_header = vec![0u8];
    parent_header.extend_from_slice(&batch_index.saturating_sub(1).to_be_bytes());
    parent_header.resize(89, 0);

    let chunks = (start..=end)
        .map(|number| {
            let mut chunk = vec![1u8];
            chunk.extend_from_slice(&number.to_be_bytes());
            chunk.resize(61, 0);
            Bytes::from(chunk)
        })
        .collect();

    IScrollChain::commitBatchCall {
        version: 0,
        parentBatchHeader: parent_header.into(),
        chunks,
        skippedL1MessageBitmap: Bytes::new(),
    }
    .abi_encode()
    .into()
}

#[async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<BlockNumber> {
        let state = self.state.lock().await;
        state.ensure_reachable()?;
        Ok(state.canonical.keys().next_back().copied().unwrap_or_default())
    }

    async fn header_by_number(&self, number: BlockNumber) -> Result<BlockHeader> {
        let state = self.state.lock().await;
        state.ensure_reachable()?;
        state.canonical.get(&number).copied().ok_or_else(|| eyre!("block {number} not found"))
    }

    async fn header_by_hash(&self, hash: BlockHash) -> Result<BlockHeader> {
        let state = self.state.lock().await;
        state.ensure_reachable()?;
        if state.failing_hash_lookups {
            bail!("header lookup by hash unavailable");
        }
        state.by_hash.get(&hash).copied().ok_or_else(|| eyre!("block {hash} not found"))
    }

    async fn filter_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let state = self.state.lock().await;
        state.ensure_reachable()?;
        let from = filter.get_from_block().unwrap_or_default();
        let to = filter.get_to_block().unwrap_or(u64::MAX);
        Ok(state
            .logs
            .iter()
            .filter(|log| log.block_number.is_some_and(|number| (from..=to).contains(&number)))
            .filter(|log| filter.address.matches(&log.address()))
            .filter(|log| log.topics().first().is_some_and(|topic| filter.topics[0].matches(topic)))
            .cloned()
            .collect())
    }

    async fn transaction_input(&self, tx_hash: B256) -> Result<Bytes> {
        let state = self.state.lock().await;
        state.ensure_reachable()?;
        state.inputs.get(&tx_hash).cloned().ok_or_else(|| eyre!("transaction {tx_hash} not found"))
    }
}
