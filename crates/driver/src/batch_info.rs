//! Committed rollup batches on L1.
use std::sync::Arc;

use alloy_rpc_types_eth::Filter;
use alloy_sol_types::SolEvent;
use chainio::IScrollChain::CommitBatch;
use extractor::{ChainClient, parse_commit_batch_logs};
use eyre::{Result, WrapErr};
use storage::BridgeStore;
use tokio::{
    sync::Notify,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::BatchConfig;

/// Stores every committed batch with the L2 block range it covers, and wakes the proof
/// updater when new ones arrive.
#[derive(Debug)]
pub struct BatchInfoFetcher {
    config: BatchConfig,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn BridgeStore>,
    notify: Arc<Notify>,
    cursor: Option<u64>,
}

impl BatchInfoFetcher {
    /// Create a fetcher that signals `notify` after storing new batches.
    pub fn new(
        config: BatchConfig,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn BridgeStore>,
        notify: Arc<Notify>,
    ) -> Self {
        Self { config, client, store, notify, cursor: None }
    }

    /// Runs until `cancel` is cancelled.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Batch fetcher stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.fetch().await {
                warn!(err = %err, "Batch fetch failed, retrying next tick");
            }
        }
    }

    /// Fetches every confirmed commit not stored yet. Returns the number of stored batches.
    pub async fn fetch(&mut self) -> Result<usize> {
        let head = self.client.block_number().await?;
        let target = head.saturating_sub(self.config.confirmations);

        let mut from = match self.cursor {
            Some(cursor) => cursor + 1,
            None => match self.store.latest_rollup_batch().await? {
                Some(batch) => batch.commit_height + 1,
                None => self.config.start_height,
            },
        };

        let limit = self.config.fetch_limit.max(1);
        let mut stored = 0;
        while from <= target {
            let to = target.min(from + limit - 1);
            stored += self.fetch_range(from, to).await?;
            self.cursor = Some(to);
            from = to + 1;
        }
        Ok(stored)
    }

    async fn fetch_range(&self, from: u64, to: u64) -> Result<usize> {
        let filter = Filter::new()
            .from_block(from)
            .to_block(to)
            .address(self.config.address)
            .event_signature(CommitBatch::SIGNATURE_HASH);
        let logs = self
            .client
            .filter_logs(&filter)
            .await
            .wrap_err_with(|| format!("failed to fetch commits of blocks {from}..={to}"))?;

        let mut batches = Vec::new();
        for commit in parse_commit_batch_logs(&logs)? {
            batches.push(commit.resolve(self.client.as_ref()).await?);
        }
        if batches.is_empty() {
            return Ok(0);
        }

        self.store.insert_rollup_batches(&batches).await?;
        info!(
            from = batches.first().map(|b| b.batch_index),
            to = batches.last().map(|b| b.batch_index),
            "Stored committed batches"
        );
        self.notify.notify_one();
        Ok(batches.len())
    }
}
