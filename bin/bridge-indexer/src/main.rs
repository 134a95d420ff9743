//! Entrypoint.

use clap::Parser;
use config::Opts;
use dotenvy::dotenv;
use driver::Driver;
use runtime::shutdown::{ShutdownSignal, cancel_on_shutdown};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    if let Ok(custom_env_file) = std::env::var("ENV_FILE") {
        dotenvy::from_filename(custom_env_file)?;
    } else {
        // Try the default .env file, and ignore if it doesn't exist.
        dotenv().ok();
    }

    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Bridge indexer starting...");

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(ShutdownSignal::new()?, shutdown.clone()));

    Driver::new(opts).await?.start(shutdown).await
}
