use clap::Parser;
use tokio_util::sync::CancellationToken;

use webploy::args::Args;
use webploy::{config, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let cfg = config::load(args.config.as_deref())?;

    let shutdown = CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            shutdown_for_signal.cancel();
        }
    });

    webploy::run(cfg, shutdown).await
}
