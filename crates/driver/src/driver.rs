//! Bridge indexer driver: wires the fetchers of both chains, the batch fetcher and the proof
//! updater onto one task set.

use std::sync::Arc;

use config::Opts;
use extractor::{ChainClient, RpcChainClient};
use eyre::{Context, Result};
use primitives::retries::{is_connection_refused, retry_with_backoff_if};
use storage::{BridgeStore, Layer, PgStore};
use tokio::{sync::Notify, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    batch_info::BatchInfoFetcher,
    config::DriverConfig,
    coordinator::FetchCoordinator,
    fetcher::{L1EventFetcher, L2EventFetcher},
    msg_proof::MsgProofUpdater,
    timestamp::BlockTimestampFetcher,
};

/// Owns every long-running task of the indexer.
#[derive(Debug)]
pub struct Driver {
    config: DriverConfig,
    l1: Arc<dyn ChainClient>,
    l2: Arc<dyn ChainClient>,
    store: Arc<dyn BridgeStore>,
}

impl Driver {
    /// Connects to postgres and both chains.
    pub async fn new(opts: Opts) -> Result<Self> {
        info!("Initializing driver");

        let store = PgStore::connect(&opts.db.database_url, opts.db.database_max_connections).await?;
        store.init_db(opts.reset_db).await?;

        let l1: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(opts.l1.l1_rpc_url.clone()));
        let l2: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(opts.l2.l2_rpc_url.clone()));
        check_rpc(Layer::L1, l1.as_ref()).await?;
        check_rpc(Layer::L2, l2.as_ref()).await?;

        Ok(Self::from_parts(DriverConfig::from(&opts), l1, l2, Arc::new(store)))
    }

    /// Builds a driver from already connected parts.
    pub fn from_parts(
        config: DriverConfig,
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        store: Arc<dyn BridgeStore>,
    ) -> Self {
        Self { config, l1, l2, store }
    }

    /// Runs every task until `shutdown` is cancelled or one of them fails.
    ///
    /// A failing task cancels the others and its error is returned.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let Self { config, l1, l2, store } = self;
        let mut tasks = JoinSet::new();

        let l1_fetcher = L1EventFetcher::new(Arc::clone(&l1), Arc::clone(&store), config.l1.addresses.clone());
        let l1_coordinator = Arc::new(FetchCoordinator::new(
            config.l1.clone(),
            Arc::clone(&l1),
            Arc::new(l1_fetcher),
            shutdown.child_token(),
        ));
        l1_coordinator.start(&mut tasks);

        let l2_fetcher = L2EventFetcher::new(Arc::clone(&l2), Arc::clone(&store), config.l2.addresses.clone());
        let l2_coordinator = Arc::new(FetchCoordinator::new(
            config.l2.clone(),
            Arc::clone(&l2),
            Arc::new(l2_fetcher),
            shutdown.child_token(),
        ));
        l2_coordinator.start(&mut tasks);

        let notify = Arc::new(Notify::new());
        let batches =
            BatchInfoFetcher::new(config.batch.clone(), Arc::clone(&l1), Arc::clone(&store), Arc::clone(&notify));
        tasks.spawn(batches.run(shutdown.child_token()));

        let proofs = MsgProofUpdater::new(Arc::clone(&store), config.proof_update_interval, notify);
        tasks.spawn(proofs.run(shutdown.child_token()));

        let l1_timestamps = BlockTimestampFetcher::new(config.l1.clone(), l1, Arc::clone(&store));
        tasks.spawn(l1_timestamps.run(shutdown.child_token()));
        let l2_timestamps = BlockTimestampFetcher::new(config.l2.clone(), l2, store);
        tasks.spawn(l2_timestamps.run(shutdown.child_token()));

        info!(tasks = tasks.len(), "Driver started");

        while let Some(joined) = tasks.join_next().await {
            let result = joined.wrap_err("indexer task panicked").and_then(|result| result);
            if let Err(err) = result {
                error!(err = %err, "Indexer task failed, shutting down");
                shutdown.cancel();
                tasks.abort_all();
                return Err(err);
            }
        }

        info!("Driver stopped");
        Ok(())
    }
}

/// Waits for the node behind `client` to answer, retrying while the connection is refused.
async fn check_rpc(layer: Layer, client: &dyn ChainClient) -> Result<()> {
    let head = retry_with_backoff_if(|| client.block_number(), |e: &eyre::Report| is_connection_refused(e))
        .await
        .wrap_err_with(|| format!("{layer} RPC unreachable"))?;
    info!(%layer, head, "Connected to RPC");
    Ok(())
}
