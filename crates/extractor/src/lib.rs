//! Bridge Indexer Extractor
//!
//! Read-only access to the two chains the indexer follows, plus the decoding of raw logs into
//! message rows.
pub mod parser;
pub mod reorg;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use alloy::{
    primitives::{B256, BlockHash, BlockNumber, Bytes},
    providers::{Provider, ProviderBuilder},
};
use alloy_consensus::{BlockHeader as _, Transaction as _};
use alloy_rpc_client::ClientBuilder;
use alloy_rpc_types_eth::{Block, BlockNumberOrTag, Filter, Log};
use async_trait::async_trait;
use chainio::DefaultProvider;
use derive_more::Debug;
use eyre::{OptionExt, Result, WrapErr};
use primitives::{headers::BlockHeader, retries::DEFAULT_RETRY_LAYER};
use url::Url;

pub use parser::{CommitBatchLog, parse_commit_batch_logs, parse_l1_logs, parse_l2_logs};
pub use reorg::{AncestorSearch, HeaderCache, find_common_ancestor};

/// The chain queries used by the fetchers.
#[async_trait]
pub trait ChainClient: Send + Sync + std::fmt::Debug {
    /// Latest block number.
    async fn block_number(&self) -> Result<BlockNumber>;

    /// Header of the canonical block at `number`.
    async fn header_by_number(&self, number: BlockNumber) -> Result<BlockHeader>;

    /// Header of the block with the given hash, canonical or not.
    async fn header_by_hash(&self, hash: BlockHash) -> Result<BlockHeader>;

    /// Logs matching `filter`.
    async fn filter_logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    /// Calldata of a transaction.
    async fn transaction_input(&self, tx_hash: B256) -> Result<Bytes>;
}

/// [`ChainClient`] over a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    #[debug(skip)]
    provider: DefaultProvider,
}

impl RpcChainClient {
    /// Create a new client. Requests are retried with [`DEFAULT_RETRY_LAYER`].
    pub fn new(rpc_url: Url) -> Self {
        let client = ClientBuilder::default().layer(DEFAULT_RETRY_LAYER).http(rpc_url);
        let provider = ProviderBuilder::new().connect_client(client);
        Self { provider }
    }
}

fn to_header(block: Block) -> BlockHeader {
    BlockHeader {
        number: block.header.number(),
        hash: block.header.hash,
        parent_hash: block.header.parent_hash(),
        timestamp: block.header.timestamp(),
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn block_number(&self) -> Result<BlockNumber> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn header_by_number(&self, number: BlockNumber) -> Result<BlockHeader> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .wrap_err_with(|| format!("failed to get block {number}"))?
            .ok_or_else(|| eyre::eyre!("block {number} not found"))?;
        Ok(to_header(block))
    }

    async fn header_by_hash(&self, hash: BlockHash) -> Result<BlockHeader> {
        let block = self
            .provider
            .get_block_by_hash(hash)
            .await
            .wrap_err_with(|| format!("failed to get block {hash}"))?
            .ok_or_else(|| eyre::eyre!("block {hash} not found"))?;
        Ok(to_header(block))
    }

    async fn filter_logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        Ok(self.provider.get_logs(filter).await?)
    }

    async fn transaction_input(&self, tx_hash: B256) -> Result<Bytes> {
        let tx = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await?
            .ok_or_eyre("transaction not found")?;
        Ok(tx.input().clone())
    }
}
