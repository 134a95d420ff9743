//! Bridge indexer configuration
use alloy_primitives::Address;
use clap::Parser;
use url::Url;

/// Postgres configuration options
#[derive(Debug, Clone, Parser)]
pub struct DatabaseOpts {
    /// Postgres connection URL
    #[clap(long, env = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of pooled connections
    #[clap(long, env = "DATABASE_MAX_CONNECTIONS", default_value = "10")]
    pub database_max_connections: u32,
}

/// L1 chain configuration options
#[derive(Debug, Clone, Parser)]
pub struct L1Opts {
    /// L1 RPC URL
    #[clap(long, env = "L1_RPC_URL")]
    pub l1_rpc_url: Url,
    /// Blocks an L1 log must be buried under before it is fetched
    #[clap(long, env = "L1_CONFIRMATIONS", default_value = "64")]
    pub l1_confirmations: u64,
    /// L1 block time in seconds
    #[clap(long, env = "L1_BLOCK_TIME_SECS", default_value = "12")]
    pub l1_block_time_secs: u64,
    /// Blocks per `eth_getLogs` request
    #[clap(long, env = "L1_FETCH_LIMIT", default_value = "100")]
    pub l1_fetch_limit: u64,
    /// First L1 block to index
    #[clap(long, env = "L1_START_HEIGHT", default_value = "0")]
    pub l1_start_height: u64,
    /// L1 messenger address
    #[clap(long, env = "L1_MESSENGER_ADDRESS")]
    pub l1_messenger_address: Address,
    /// L1 gateway addresses, comma separated
    #[clap(long, env = "L1_GATEWAY_ADDRESSES", value_delimiter = ',')]
    pub l1_gateway_addresses: Vec<Address>,
}

/// L2 chain configuration options
#[derive(Debug, Clone, Parser)]
pub struct L2Opts {
    /// L2 RPC URL
    #[clap(long, env = "L2_RPC_URL")]
    pub l2_rpc_url: Url,
    /// Blocks an L2 log must be buried under before it is fetched
    #[clap(long, env = "L2_CONFIRMATIONS", default_value = "1")]
    pub l2_confirmations: u64,
    /// L2 block time in seconds
    #[clap(long, env = "L2_BLOCK_TIME_SECS", default_value = "3")]
    pub l2_block_time_secs: u64,
    /// Blocks per `eth_getLogs` request
    #[clap(long, env = "L2_FETCH_LIMIT", default_value = "100")]
    pub l2_fetch_limit: u64,
    /// First L2 block to index
    #[clap(long, env = "L2_START_HEIGHT", default_value = "0")]
    pub l2_start_height: u64,
    /// L2 messenger address
    #[clap(long, env = "L2_MESSENGER_ADDRESS")]
    pub l2_messenger_address: Address,
    /// L2 gateway addresses, comma separated
    #[clap(long, env = "L2_GATEWAY_ADDRESSES", value_delimiter = ',')]
    pub l2_gateway_addresses: Vec<Address>,
}

/// Rollup batch configuration options
#[derive(Debug, Clone, Parser)]
pub struct BatchOpts {
    /// Rollup contract address on L1
    #[clap(long, env = "SCROLL_CHAIN_ADDRESS")]
    pub scroll_chain_address: Address,
    /// First L1 block scanned for committed batches
    #[clap(long, env = "BATCH_START_HEIGHT", default_value = "0")]
    pub batch_start_height: u64,
    /// Confirmations required before a commit is fetched
    #[clap(long, env = "BATCH_CONFIRMATIONS", default_value = "64")]
    pub batch_confirmations: u64,
    /// Blocks per `eth_getLogs` request
    #[clap(long, env = "BATCH_FETCH_LIMIT", default_value = "100")]
    pub batch_fetch_limit: u64,
}

/// CLI options for the bridge indexer
#[derive(Debug, Clone, Parser)]
pub struct Opts {
    /// Postgres configuration
    #[clap(flatten)]
    pub db: DatabaseOpts,

    /// L1 configuration
    #[clap(flatten)]
    pub l1: L1Opts,

    /// L2 configuration
    #[clap(flatten)]
    pub l2: L2Opts,

    /// Rollup batch configuration
    #[clap(flatten)]
    pub batch: BatchOpts,

    /// Seconds a reorg may take to resolve before the process gives up
    #[clap(long, env = "REORG_TIMEOUT_SECS", default_value = "300")]
    pub reorg_timeout_secs: u64,

    /// Seconds between withdraw proof updates
    #[clap(long, env = "PROOF_UPDATE_INTERVAL_SECS", default_value = "10")]
    pub proof_update_interval_secs: u64,

    /// If set, drop & re-create all tables (local/dev only)
    #[clap(long, env = "RESET_DB")]
    pub reset_db: bool,
}
