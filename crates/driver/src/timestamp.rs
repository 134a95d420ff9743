//! Block timestamps for stored cross-chain messages.
use std::sync::Arc;

use chrono::DateTime;
use extractor::ChainClient;
use eyre::{Result, eyre};
use storage::BridgeStore;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChainConfig;

/// Fills `block_timestamp` on messages of one layer once their block is confirmed.
#[derive(Debug)]
pub struct BlockTimestampFetcher {
    config: ChainConfig,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn BridgeStore>,
}

impl BlockTimestampFetcher {
    /// Create a fetcher for the layer in `config`.
    pub fn new(config: ChainConfig, client: Arc<dyn ChainClient>, store: Arc<dyn BridgeStore>) -> Self {
        Self { config, client, store }
    }

    /// Runs until `cancel` is cancelled.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let layer = self.config.layer;
        let mut ticker = interval(self.config.fetch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(%layer, "Timestamp fetcher stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.fill().await {
                warn!(%layer, err = %err, "Timestamp fill failed, retrying next tick");
            }
        }
    }

    /// Fills timestamps for every confirmed height missing one. Returns the number of heights
    /// filled.
    pub async fn fill(&self) -> Result<usize> {
        let layer = self.config.layer;
        let head = self.client.block_number().await?;
        let mut filled = 0;

        while let Some(height) = self.store.earliest_height_without_timestamp(layer).await? {
            if head < height.saturating_add(self.config.confirmations) {
                break;
            }
            let header = self.client.header_by_number(height).await?;
            let timestamp = i64::try_from(header.timestamp)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| eyre!("block {height} has invalid timestamp {}", header.timestamp))?;

            let updated = self.store.set_block_timestamp(layer, height, timestamp).await?;
            debug!(%layer, height, updated, "Filled block timestamp");
            if updated == 0 {
                break;
            }
            filled += 1;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};
    use extractor::mock::MockChain;
    use std::time::Duration;
    use storage::{AssetKind, CrossMessage, Layer, LayerEvents, MemoryStore};

    fn deposit(height: u64, tx: u8) -> CrossMessage {
        CrossMessage {
            layer: Layer::L1,
            height,
            tx_hash: B256::repeat_byte(tx),
            log_index: 0,
            sender: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            asset: AssetKind::Eth,
            amount: U256::from(1),
            l1_token: None,
            l2_token: None,
            token_ids: Vec::new(),
            token_amounts: Vec::new(),
            msg_hash: None,
            counterparty_tx_hash: None,
            block_timestamp: None,
        }
    }

    fn config(confirmations: u64) -> ChainConfig {
        ChainConfig {
            layer: Layer::L1,
            confirmations,
            block_time: Duration::from_millis(10),
            fetch_limit: 10,
            start_height: 0,
            addresses: vec![],
            reorg_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn fills_confirmed_heights_only() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        chain.extend(10, 0).await;
        let events = LayerEvents {
            cross_messages: vec![deposit(3, 1), deposit(3, 2), deposit(8, 3)],
            ..Default::default()
        };
        store.save_layer_events(Layer::L1, &events).await.unwrap();

        let fetcher = BlockTimestampFetcher::new(config(4), chain.clone(), store.clone());
        assert_eq!(fetcher.fill().await.unwrap(), 1);

        let header = chain.header(3).await.unwrap();
        let messages = store.cross_messages(Layer::L1).await;
        let at_three: Vec<_> = messages.iter().filter(|m| m.height == 3).collect();
        assert_eq!(at_three.len(), 2);
        assert!(at_three.iter().all(|m| m.block_timestamp.map(|t| t.timestamp() as u64) == Some(header.timestamp)));
        assert_eq!(store.earliest_height_without_timestamp(Layer::L1).await.unwrap(), Some(8));

        chain.extend(2, 0).await;
        assert_eq!(fetcher.fill().await.unwrap(), 1);
        assert_eq!(store.earliest_height_without_timestamp(Layer::L1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rpc_failure_leaves_rows_untouched() {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        chain.extend(10, 0).await;
        let events = LayerEvents { cross_messages: vec![deposit(2, 1)], ..Default::default() };
        store.save_layer_events(Layer::L1, &events).await.unwrap();

        chain.set_failing(true).await;
        let fetcher = BlockTimestampFetcher::new(config(0), chain.clone(), store.clone());
        assert!(fetcher.fill().await.is_err());
        assert_eq!(store.earliest_height_without_timestamp(Layer::L1).await.unwrap(), Some(2));
    }
}
