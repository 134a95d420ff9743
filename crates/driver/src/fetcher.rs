//! Per-chain event fetchers.
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use chainio::{l1_event_signatures, l2_event_signatures};
use extractor::{ChainClient, parse_l1_logs, parse_l2_logs};
use eyre::{Result, WrapErr};
use storage::{BridgeStore, Layer, LayerEvents, RollbackSummary};
use tracing::debug;

/// What the [`FetchCoordinator`](crate::coordinator::FetchCoordinator) needs from one chain.
#[async_trait]
pub trait LayerFetcher: Send + Sync + std::fmt::Debug {
    /// Chain this fetcher indexes.
    fn layer(&self) -> Layer;

    /// Highest height stored in any message table of the chain.
    async fn latest_processed_height(&self) -> Result<Option<u64>>;

    /// Fetches, decodes and stores the logs of blocks `from..=to` in one transaction.
    /// Returns the number of stored records.
    async fn fetch_and_save(&self, from: u64, to: u64) -> Result<usize>;

    /// Soft-deletes every record above `height`.
    async fn rollback(&self, height: u64) -> Result<RollbackSummary>;
}

#[derive(Debug, Clone)]
struct EventSource {
    client: Arc<dyn ChainClient>,
    store: Arc<dyn BridgeStore>,
    addresses: Vec<Address>,
    topics: Vec<B256>,
}

impl EventSource {
    fn filter(&self, from: u64, to: u64) -> Filter {
        Filter::new()
            .from_block(from)
            .to_block(to)
            .address(self.addresses.clone())
            .event_signature(self.topics.clone())
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<Log>> {
        self.client
            .filter_logs(&self.filter(from, to))
            .await
            .wrap_err_with(|| format!("failed to fetch logs of blocks {from}..={to}"))
    }

    async fn save(&self, layer: Layer, from: u64, to: u64, events: LayerEvents) -> Result<usize> {
        let count = events.cross_messages.len() + events.relayed_messages.len() + events.sent_messages.len();
        if count > 0 {
            self.store
                .save_layer_events(layer, &events)
                .await
                .wrap_err_with(|| format!("failed to store {layer} events of blocks {from}..={to}"))?;
        }
        debug!(%layer, from, to, count, "Fetched block range");
        Ok(count)
    }
}

/// Deposits and messenger events on L1.
#[derive(Debug, Clone)]
pub struct L1EventFetcher {
    source: EventSource,
}

impl L1EventFetcher {
    /// Create a fetcher watching `addresses` for the L1 topic set.
    pub fn new(client: Arc<dyn ChainClient>, store: Arc<dyn BridgeStore>, addresses: Vec<Address>) -> Self {
        Self { source: EventSource { client, store, addresses, topics: l1_event_signatures() } }
    }
}

#[async_trait]
impl LayerFetcher for L1EventFetcher {
    fn layer(&self) -> Layer {
        Layer::L1
    }

    async fn latest_processed_height(&self) -> Result<Option<u64>> {
        Ok(self.source.store.processed_heights(Layer::L1).await?.max())
    }

    async fn fetch_and_save(&self, from: u64, to: u64) -> Result<usize> {
        let logs = self.source.logs(from, to).await?;
        let events = parse_l1_logs(&logs)?;
        self.source.save(Layer::L1, from, to, events).await
    }

    async fn rollback(&self, height: u64) -> Result<RollbackSummary> {
        self.source.store.rollback(Layer::L1, height).await
    }
}

/// Withdrawals and messenger events on L2, including the withdraw trie leaves.
#[derive(Debug, Clone)]
pub struct L2EventFetcher {
    source: EventSource,
}

impl L2EventFetcher {
    /// Create a fetcher watching `addresses` for the L2 topic set.
    pub fn new(client: Arc<dyn ChainClient>, store: Arc<dyn BridgeStore>, addresses: Vec<Address>) -> Self {
        Self { source: EventSource { client, store, addresses, topics: l2_event_signatures() } }
    }
}

#[async_trait]
impl LayerFetcher for L2EventFetcher {
    fn layer(&self) -> Layer {
        Layer::L2
    }

    async fn latest_processed_height(&self) -> Result<Option<u64>> {
        Ok(self.source.store.processed_heights(Layer::L2).await?.max())
    }

    async fn fetch_and_save(&self, from: u64, to: u64) -> Result<usize> {
        let logs = self.source.logs(from, to).await?;
        let events = parse_l2_logs(&logs)?;
        self.source.save(Layer::L2, from, to, events).await
    }

    async fn rollback(&self, height: u64) -> Result<RollbackSummary> {
        self.source.store.rollback(Layer::L2, height).await
    }
}
