//! Static per-component configuration derived from [`Opts`].
use std::time::Duration;

use alloy_primitives::Address;
use config::Opts;
use storage::Layer;

/// Shortest period used for any ticker.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Configuration of one chain's fetch coordinator and timestamp fetcher.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Chain being followed
    pub layer: Layer,
    /// Depth after which a block is considered final
    pub confirmations: u64,
    /// Expected block time, the forward-fetch period
    pub block_time: Duration,
    /// Blocks per log query
    pub fetch_limit: u64,
    /// First block to index
    pub start_height: u64,
    /// Contracts whose logs are fetched
    pub addresses: Vec<Address>,
    /// Deadline for resolving a reorg.
    ///
    /// Expiry is only noticed on the next fetch or header-poll tick, so a timeout can surface
    /// up to one tick interval late.
    pub reorg_timeout: Duration,
}

impl ChainConfig {
    /// L1 configuration: the messenger plus every deposit gateway.
    pub fn l1(opts: &Opts) -> Self {
        let l1 = &opts.l1;
        let mut addresses = vec![l1.l1_messenger_address];
        addresses.extend(&l1.l1_gateway_addresses);
        Self {
            layer: Layer::L1,
            confirmations: l1.l1_confirmations,
            block_time: Duration::from_secs(l1.l1_block_time_secs),
            fetch_limit: l1.l1_fetch_limit,
            start_height: l1.l1_start_height,
            addresses,
            reorg_timeout: Duration::from_secs(opts.reorg_timeout_secs),
        }
    }

    /// L2 configuration: the messenger plus every withdrawal gateway.
    pub fn l2(opts: &Opts) -> Self {
        let l2 = &opts.l2;
        let mut addresses = vec![l2.l2_messenger_address];
        addresses.extend(&l2.l2_gateway_addresses);
        Self {
            layer: Layer::L2,
            confirmations: l2.l2_confirmations,
            block_time: Duration::from_secs(l2.l2_block_time_secs),
            fetch_limit: l2.l2_fetch_limit,
            start_height: l2.l2_start_height,
            addresses,
            reorg_timeout: Duration::from_secs(opts.reorg_timeout_secs),
        }
    }

    /// Period of the forward-fetch task.
    pub fn fetch_interval(&self) -> Duration {
        self.block_time.max(MIN_TICK)
    }

    /// Period of the header-poll task, half the block time.
    pub fn header_poll_interval(&self) -> Duration {
        (self.block_time / 2).max(MIN_TICK)
    }

    /// Number of headers kept for reorg detection.
    pub fn header_cache_size(&self) -> usize {
        usize::try_from(self.confirmations).unwrap_or(usize::MAX).max(1)
    }
}

/// Configuration of the committed batch fetcher.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Rollup contract on L1
    pub address: Address,
    /// Depth after which a commit is fetched
    pub confirmations: u64,
    /// Blocks per log query
    pub fetch_limit: u64,
    /// First L1 block scanned when no batch is stored
    pub start_height: u64,
    /// Polling period
    pub interval: Duration,
}

impl BatchConfig {
    /// Batch configuration, polled at the L1 block time.
    pub fn new(opts: &Opts) -> Self {
        Self {
            address: opts.batch.scroll_chain_address,
            confirmations: opts.batch.batch_confirmations,
            fetch_limit: opts.batch.batch_fetch_limit,
            start_height: opts.batch.batch_start_height,
            interval: Duration::from_secs(opts.l1.l1_block_time_secs).max(MIN_TICK),
        }
    }
}

/// Everything the [`Driver`](crate::Driver) wires together.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// L1 chain
    pub l1: ChainConfig,
    /// L2 chain
    pub l2: ChainConfig,
    /// Committed batches
    pub batch: BatchConfig,
    /// Period of the withdraw proof updater
    pub proof_update_interval: Duration,
}

impl From<&Opts> for DriverConfig {
    fn from(opts: &Opts) -> Self {
        Self {
            l1: ChainConfig::l1(opts),
            l2: ChainConfig::l2(opts),
            batch: BatchConfig::new(opts),
            proof_update_interval: Duration::from_secs(opts.proof_update_interval_secs).max(MIN_TICK),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(block_time: Duration, confirmations: u64) -> ChainConfig {
        ChainConfig {
            layer: Layer::L2,
            confirmations,
            block_time,
            fetch_limit: 10,
            start_height: 0,
            addresses: Vec::new(),
            reorg_timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn header_poll_runs_at_half_block_time() {
        let config = chain(Duration::from_secs(3), 1);
        assert_eq!(config.fetch_interval(), Duration::from_secs(3));
        assert_eq!(config.header_poll_interval(), Duration::from_millis(1500));
    }

    #[test]
    fn zero_values_are_clamped() {
        let config = chain(Duration::ZERO, 0);
        assert_eq!(config.fetch_interval(), MIN_TICK);
        assert_eq!(config.header_poll_interval(), MIN_TICK);
        assert_eq!(config.header_cache_size(), 1);
    }
}
