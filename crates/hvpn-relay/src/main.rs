#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use hvpn_common::telemetry::{init_tracing, install_crypto_provider, start_metrics_server};
use hvpn_relay::config::{Args, RelayConfig};
use hvpn_relay::run_with_shutdown;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log)?;
    install_crypto_provider();

    let config =
        RelayConfig::try_from(args).map_err(|e| anyhow::anyhow!("configuration error: {}", e))?;
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }
    info!(relay_id = %config.relay_id, location = %config.location, "starting relay");

    if let Some(addr) = config.serve.metrics_addr {
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(addr).await {
                warn!("metrics server error: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(config.serve.listen).await?;
    info!("bound to {}", config.serve.listen);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    run_with_shutdown(listener, &config, shutdown_rx).await?;
    Ok(())
}
