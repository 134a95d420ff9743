//! Forward fetching and reorg handling for one chain.
//!
//! Two periodic tasks share a [`SyncCore`] behind one mutex: the forward fetch walks confirmed
//! block ranges into the store while the header poll extends a [`HeaderCache`] and rolls the
//! store back when the chain forks. Holding the mutex for a whole tick keeps the two from
//! interleaving.
use std::{sync::Arc, time::Duration};

use extractor::{AncestorSearch, ChainClient, HeaderCache, find_common_ancestor};
use eyre::Result;
use primitives::headers::BlockHeader;
use tokio::{
    sync::Mutex,
    task::JoinSet,
    time::{Instant, MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::ChainConfig,
    error::{SyncError, is_fatal},
    fetcher::LayerFetcher,
};

/// Reorg handshake state of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Following the chain.
    Normal,
    /// A fork was detected and the store has not been rolled back yet.
    RollingBack {
        /// When the fork was first detected
        since: Instant,
    },
}

#[derive(Debug)]
struct SyncCore {
    state: SyncState,
    cache: HeaderCache,
    /// Last height handed to the fetcher, `None` until loaded from the store.
    cursor: Option<u64>,
    caught_up: bool,
}

impl SyncCore {
    fn check_deadline(&self, config: &ChainConfig) -> Result<(), SyncError> {
        if let SyncState::RollingBack { since } = self.state {
            if since.elapsed() >= config.reorg_timeout {
                return Err(SyncError::ReorgTimeout {
                    layer: config.layer,
                    timeout: config.reorg_timeout,
                });
            }
        }
        Ok(())
    }

    fn rewind(&mut self, height: u64) {
        if let Some(cursor) = self.cursor {
            self.cursor = Some(cursor.min(height));
        }
    }
}

/// Drives a [`LayerFetcher`] forward and keeps it consistent across reorgs.
#[derive(Debug)]
pub struct FetchCoordinator {
    config: ChainConfig,
    client: Arc<dyn ChainClient>,
    fetcher: Arc<dyn LayerFetcher>,
    core: Mutex<SyncCore>,
    cancel: CancellationToken,
}

impl FetchCoordinator {
    /// Create a coordinator. Its tasks stop when `cancel` is cancelled.
    pub fn new(
        config: ChainConfig,
        client: Arc<dyn ChainClient>,
        fetcher: Arc<dyn LayerFetcher>,
        cancel: CancellationToken,
    ) -> Self {
        let core = SyncCore {
            state: SyncState::Normal,
            cache: HeaderCache::new(config.header_cache_size()),
            cursor: None,
            caught_up: false,
        };
        Self { config, client, fetcher, core: Mutex::new(core), cancel }
    }

    /// Spawns the forward-fetch and header-poll tasks onto `tasks`.
    pub fn start(self: &Arc<Self>, tasks: &mut JoinSet<Result<()>>) {
        info!(layer = %self.config.layer, "Starting fetch coordinator");

        let this = Arc::clone(self);
        tasks.spawn(async move { this.run_periodic(this.config.fetch_interval(), Task::Fetch).await });

        let this = Arc::clone(self);
        tasks.spawn(async move { this.run_periodic(this.config.header_poll_interval(), Task::Poll).await });
    }

    /// Requests both tasks to stop. In-flight ticks are not awaited.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Current reorg state.
    pub async fn state(&self) -> SyncState {
        self.core.lock().await.state
    }

    /// Copy of the cached headers, oldest first.
    pub async fn cached_headers(&self) -> Vec<BlockHeader> {
        self.core.lock().await.cache.iter().copied().collect()
    }

    async fn run_periodic(&self, period: Duration, task: Task) -> Result<()> {
        let layer = self.config.layer;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(%layer, ?task, "Task stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let result = match task {
                Task::Fetch => self.forward_fetch().await,
                Task::Poll => self.poll_headers().await,
            };
            if let Err(err) = result {
                if is_fatal(&err) {
                    error!(%layer, ?task, err = %err, "Unrecoverable sync failure");
                    return Err(err);
                }
                warn!(%layer, ?task, err = %err, "Tick failed, retrying next tick");
            }
        }
    }

    /// Runs one forward-fetch pass.
    ///
    /// The first pass goes up to the chain head; later passes stop `confirmations` blocks
    /// below it. Progress is kept per chunk, so a failure resumes at the failed chunk.
    pub async fn forward_fetch(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.check_deadline(&self.config)?;
        if let SyncState::RollingBack { .. } = core.state {
            debug!(layer = %self.config.layer, "Rollback pending, skipping fetch");
            return Ok(());
        }

        let head = self.client.block_number().await?;
        let target = if core.caught_up { head.saturating_sub(self.config.confirmations) } else { head };

        let mut from = match core.cursor {
            Some(cursor) => cursor + 1,
            None => {
                let processed = self.fetcher.latest_processed_height().await?;
                processed.map_or(0, |height| height + 1).max(self.config.start_height)
            }
        };

        let limit = self.config.fetch_limit.max(1);
        while from <= target {
            let to = target.min(from + limit - 1);
            self.fetcher.fetch_and_save(from, to).await?;
            core.cursor = Some(to);
            from = to + 1;
        }

        if !core.caught_up {
            info!(layer = %self.config.layer, head, "Initial catch-up finished");
            core.caught_up = true;
        }
        Ok(())
    }

    /// Runs one header-poll pass, resolving a fork if one is found.
    pub async fn poll_headers(&self) -> Result<()> {
        let mut core = self.core.lock().await;
        core.check_deadline(&self.config)?;

        let head = self.client.block_number().await?;
        // a cold window covers the newest `header_cache_size` blocks, just above the safe height
        let start = match core.cache.tip() {
            Some(tip) => tip.number + 1,
            None => (head + 1).saturating_sub(self.config.header_cache_size() as u64),
        };

        for number in start..=head {
            let header = self.client.header_by_number(number).await?;
            if core.cache.push(header) {
                continue;
            }

            let since = match core.state {
                SyncState::RollingBack { since } => since,
                SyncState::Normal => {
                    warn!(layer = %self.config.layer, number, hash = %header.hash, "Reorg detected");
                    let since = Instant::now();
                    core.state = SyncState::RollingBack { since };
                    since
                }
            };

            let remaining = self.config.reorg_timeout.saturating_sub(since.elapsed());
            match tokio::time::timeout(remaining, self.resolve_reorg(&mut core, header)).await {
                Ok(Ok(())) => {
                    core.state = SyncState::Normal;
                    return Ok(());
                }
                Ok(Err(err)) => return Err(err.wrap_err("reorg rollback failed")),
                Err(_) => {
                    return Err(SyncError::ReorgTimeout {
                        layer: self.config.layer,
                        timeout: self.config.reorg_timeout,
                    }
                    .into());
                }
            }
        }

        // the fork vanished before it could be traced, the cached branch is live again
        if let (SyncState::RollingBack { .. }, Some(tip)) = (core.state, core.cache.tip().copied()) {
            let live = self.client.header_by_number(tip.number).await?;
            if live.hash == tip.hash {
                info!(layer = %self.config.layer, tip = tip.number, "Cached branch is canonical again");
                core.state = SyncState::Normal;
            }
        }
        Ok(())
    }

    async fn resolve_reorg(&self, core: &mut SyncCore, header: BlockHeader) -> Result<()> {
        let layer = self.config.layer;
        match find_common_ancestor(self.client.as_ref(), &core.cache, header).await? {
            AncestorSearch::Found { index, ancestor, branch } => {
                let summary = self.fetcher.rollback(ancestor.number).await?;
                info!(
                    %layer,
                    ancestor = ancestor.number,
                    new_tip = header.number,
                    cross = summary.cross_messages,
                    relayed = summary.relayed_messages,
                    sent = summary.sent_messages,
                    "Rolled back to common ancestor"
                );
                core.cache.replace_after(index, branch);
                core.rewind(ancestor.number);
            }
            AncestorSearch::NotFound => {
                let head = self.client.block_number().await?;
                let safe = head.saturating_sub(self.config.confirmations);
                let summary = self.fetcher.rollback(safe).await?;
                warn!(
                    %layer,
                    safe,
                    depth = core.cache.len(),
                    cross = summary.cross_messages,
                    relayed = summary.relayed_messages,
                    sent = summary.sent_messages,
                    "Fork below header window, rolled back to safe height"
                );
                core.cache.clear();
                core.rewind(safe);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Task {
    Fetch,
    Poll,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::L2EventFetcher;
    use alloy_primitives::{Address, B256, Bytes, U256};
    use chainio::IScrollMessenger::SentMessage;
    use extractor::mock::MockChain;
    use storage::{Layer, MemoryStore};

    const MESSENGER: Address = Address::repeat_byte(0x11);

    fn config(confirmations: u64, fetch_limit: u64) -> ChainConfig {
        ChainConfig {
            layer: Layer::L2,
            confirmations,
            block_time: Duration::from_millis(20),
            fetch_limit,
            start_height: 0,
            addresses: vec![MESSENGER],
            reorg_timeout: Duration::from_secs(300),
        }
    }

    fn sent(nonce: u64) -> SentMessage {
        SentMessage {
            sender: Address::repeat_byte(1),
            target: Address::repeat_byte(2),
            value: U256::ZERO,
            messageNonce: U256::from(nonce),
            gasLimit: U256::from(1),
            message: Bytes::new(),
        }
    }

    fn setup(config: ChainConfig) -> (Arc<MockChain>, Arc<MemoryStore>, FetchCoordinator) {
        let chain = Arc::new(MockChain::new());
        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(L2EventFetcher::new(chain.clone(), store.clone(), vec![MESSENGER]));
        let coordinator = FetchCoordinator::new(config, chain.clone(), fetcher, CancellationToken::new());
        (chain, store, coordinator)
    }

    #[tokio::test]
    async fn first_pass_reaches_head_then_waits_for_confirmations() {
        let (chain, store, coordinator) = setup(config(2, 3));
        chain.extend(10, 0).await;
        chain.add_event(5, B256::repeat_byte(1), MESSENGER, &sent(0)).await.unwrap();
        chain.add_event(10, B256::repeat_byte(2), MESSENGER, &sent(1)).await.unwrap();

        coordinator.forward_fetch().await.unwrap();
        assert_eq!(store.sent_messages().await.len(), 2);

        chain.extend(1, 0).await;
        chain.add_event(11, B256::repeat_byte(3), MESSENGER, &sent(2)).await.unwrap();
        coordinator.forward_fetch().await.unwrap();
        assert_eq!(store.sent_messages().await.len(), 2);

        chain.extend(2, 0).await;
        coordinator.forward_fetch().await.unwrap();
        assert_eq!(store.sent_messages().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_chunk_is_retried() {
        let (chain, store, coordinator) = setup(config(0, 100));
        chain.extend(4, 0).await;
        chain.add_event(2, B256::repeat_byte(1), MESSENGER, &sent(0)).await.unwrap();

        store.fail_next_write();
        assert!(coordinator.forward_fetch().await.is_err());
        assert!(store.sent_messages().await.is_empty());

        coordinator.forward_fetch().await.unwrap();
        assert_eq!(store.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn resumes_from_stored_height_and_start_height() {
        let (chain, store, coordinator) = setup(ChainConfig { start_height: 6, ..config(0, 100) });
        chain.extend(10, 0).await;
        chain.add_event(3, B256::repeat_byte(1), MESSENGER, &sent(0)).await.unwrap();
        chain.add_event(7, B256::repeat_byte(2), MESSENGER, &sent(1)).await.unwrap();

        coordinator.forward_fetch().await.unwrap();
        let nonces: Vec<_> = store.sent_messages().await.iter().map(|m| m.nonce).collect();
        assert_eq!(nonces, vec![1]);
    }

    #[tokio::test]
    async fn poll_fills_cache_from_safe_height() {
        let (chain, _store, coordinator) = setup(config(4, 100));
        chain.extend(10, 0).await;

        coordinator.poll_headers().await.unwrap();
        let numbers: Vec<_> = coordinator.cached_headers().await.iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![7, 8, 9, 10]);
        assert_eq!(coordinator.state().await, SyncState::Normal);
    }

    #[tokio::test]
    async fn reorg_rolls_back_to_common_ancestor() {
        let (chain, store, coordinator) = setup(config(64, 100));
        chain.extend(63, 0).await;
        chain.add_event(60, B256::repeat_byte(1), MESSENGER, &sent(0)).await.unwrap();
        chain.add_event(63, B256::repeat_byte(2), MESSENGER, &sent(1)).await.unwrap();

        coordinator.forward_fetch().await.unwrap();
        coordinator.poll_headers().await.unwrap();
        let cached = coordinator.cached_headers().await;
        assert_eq!((cached[0].number, cached.len()), (0, 64));

        // h64 extends h63
        chain.extend(1, 0).await;
        chain.add_event(64, B256::repeat_byte(3), MESSENGER, &sent(2)).await.unwrap();
        coordinator.forward_fetch().await.unwrap();
        coordinator.poll_headers().await.unwrap();
        assert_eq!(coordinator.cached_headers().await.last().unwrap().number, 64);
        assert_eq!(store.sent_messages().await.len(), 2);

        // new branch forks off h62
        let branch = chain.reorg_from(63, 3, 1).await;
        coordinator.poll_headers().await.unwrap();

        assert_eq!(coordinator.state().await, SyncState::Normal);
        let nonces: Vec<_> = store.sent_messages().await.iter().map(|m| m.nonce).collect();
        assert_eq!(nonces, vec![0]);

        let cached = coordinator.cached_headers().await;
        assert_eq!(cached.len(), 64);
        assert_eq!(cached.iter().rev().take(3).map(|h| h.hash).collect::<Vec<_>>(), {
            let mut hashes: Vec<_> = branch.iter().map(|h| h.hash).collect();
            hashes.reverse();
            hashes
        });
        assert_eq!(cached[cached.len() - 4].number, 62);
        assert!(cached.windows(2).all(|pair| pair[0].is_parent_of(&pair[1])));
    }

    #[tokio::test]
    async fn deep_reorg_rolls_back_to_safe_height() {
        let (chain, store, coordinator) = setup(config(3, 100));
        chain.extend(10, 0).await;
        for (i, height) in [4u64, 8, 10].into_iter().enumerate() {
            chain.add_event(height, B256::repeat_byte(i as u8 + 1), MESSENGER, &sent(i as u64)).await.unwrap();
        }
        coordinator.forward_fetch().await.unwrap();
        coordinator.poll_headers().await.unwrap();

        chain.reorg_from(5, 8, 1).await;
        coordinator.poll_headers().await.unwrap();

        // head is 12, safe height 9
        let heights: Vec<_> = store.sent_messages().await.iter().map(|m| m.height).collect();
        assert_eq!(heights, vec![4, 8]);
        assert!(coordinator.cached_headers().await.is_empty());
        assert_eq!(coordinator.state().await, SyncState::Normal);

        // the refilled window starts right above the safe height
        coordinator.poll_headers().await.unwrap();
        let numbers: Vec<_> = coordinator.cached_headers().await.iter().map(|h| h.number).collect();
        assert_eq!(numbers, vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn failed_rollback_is_retried_then_times_out() {
        let (chain, _store, coordinator) =
            setup(ChainConfig { reorg_timeout: Duration::from_millis(50), ..config(4, 100) });
        chain.extend(10, 0).await;
        coordinator.poll_headers().await.unwrap();

        chain.reorg_from(9, 3, 1).await;
        chain.set_hash_lookups_failing(true).await;
        let err = coordinator.poll_headers().await.unwrap_err();
        assert!(!is_fatal(&err));
        assert!(matches!(coordinator.state().await, SyncState::RollingBack { .. }));

        // fetching is paused while the rollback is pending
        coordinator.forward_fetch().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let err = coordinator.poll_headers().await.unwrap_err();
        assert!(is_fatal(&err));
        let err = coordinator.forward_fetch().await.unwrap_err();
        assert!(is_fatal(&err));
    }

    #[tokio::test]
    async fn pending_rollback_resolves_on_next_tick() {
        let (chain, store, coordinator) = setup(config(4, 100));
        chain.extend(10, 0).await;
        chain.add_event(10, B256::repeat_byte(1), MESSENGER, &sent(0)).await.unwrap();
        coordinator.forward_fetch().await.unwrap();
        coordinator.poll_headers().await.unwrap();

        chain.reorg_from(9, 3, 1).await;
        chain.set_hash_lookups_failing(true).await;
        assert!(coordinator.poll_headers().await.is_err());
        assert_eq!(store.sent_messages().await.len(), 1);

        chain.set_hash_lookups_failing(false).await;
        coordinator.poll_headers().await.unwrap();
        assert_eq!(coordinator.state().await, SyncState::Normal);
        assert!(store.sent_messages().await.is_empty());
    }

    #[tokio::test]
    async fn fork_that_reverts_resumes_fetching() {
        let (chain, store, coordinator) =
            setup(ChainConfig { reorg_timeout: Duration::from_millis(100), ..config(4, 100) });
        chain.extend(10, 0).await;
        coordinator.forward_fetch().await.unwrap();
        coordinator.poll_headers().await.unwrap();

        chain.set_hash_lookups_failing(true).await;
        chain.reorg_from(9, 3, 1).await;
        assert!(coordinator.poll_headers().await.is_err());
        assert!(matches!(coordinator.state().await, SyncState::RollingBack { .. }));

        // the original branch wins again and grows past the cached tip
        chain.reorg_from(9, 2, 0).await;
        chain.extend(1, 0).await;
        chain.set_hash_lookups_failing(false).await;
        coordinator.poll_headers().await.unwrap();
        assert_eq!(coordinator.state().await, SyncState::Normal);
        assert_eq!(coordinator.cached_headers().await.last().unwrap().number, 11);

        chain.add_event(11, B256::repeat_byte(1), MESSENGER, &sent(0)).await.unwrap();
        chain.extend(4, 0).await;
        coordinator.forward_fetch().await.unwrap();
        assert_eq!(store.sent_messages().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        coordinator.poll_headers().await.unwrap();
        coordinator.forward_fetch().await.unwrap();
    }

    #[tokio::test]
    async fn stop_ends_tasks() {
        let (chain, _store, coordinator) = setup(config(1, 100));
        chain.extend(3, 0).await;
        let coordinator = Arc::new(coordinator);

        let mut tasks = JoinSet::new();
        coordinator.start(&mut tasks);
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.stop();

        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }
        assert!(!coordinator.cached_headers().await.is_empty());
    }
}
