//! hvpn registry: the authoritative table of live relays.
//!
//! Relays register over HTTP, a periodic sweep evicts the ones that stop
//! answering their health probe, and every membership change is pushed to
//! the router.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// HTTP handlers.
pub mod api;
/// CLI argument parsing and registry configuration.
pub mod config;
/// Error types for registry operations.
pub mod error;
/// Prometheus counters and gauges.
pub mod metrics;
/// Registry to router push link.
pub mod propagate;
/// Durable membership store.
pub mod store;
/// Periodic health sweep.
pub mod sweep;

use crate::api::AppState;
use crate::config::RegistryConfig;
use crate::propagate::RouterPusher;
use crate::store::Registry;
use hvpn_common::ratelimit::IpRateLimiter;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub use error::{RegistryError, SyncError};
pub use store::{IdPolicy, RelayRecord};

/// Runs the registry until the process ends.
///
/// # Errors
///
/// Returns an error if background tasks cannot be set up or the listener fails.
pub async fn run(
    listener: TcpListener,
    registry: Arc<Registry>,
    config: &RegistryConfig,
) -> Result<(), RegistryError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    run_with_shutdown(listener, registry, config, shutdown_rx).await
}

/// Runs the registry until `shutdown` flips to `true`.
///
/// Spawns the health sweeper and, when a router is configured, the push
/// link, then serves the HTTP API. Background tasks stop with the listener.
///
/// # Errors
///
/// Returns an error if background tasks cannot be set up or the listener fails.
pub async fn run_with_shutdown(
    listener: TcpListener,
    registry: Arc<Registry>,
    config: &RegistryConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), RegistryError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("hvpn-registry/", env!("CARGO_PKG_VERSION")))
        .build()?;

    metrics::gauges::set_relays_registered(registry.len());

    tokio::spawn(sweep::run_sweeper(
        Arc::clone(&registry),
        client.clone(),
        config.sweep_interval,
        config.probe_timeout,
        shutdown.clone(),
    ));

    if let Some(ref router_url) = config.router_url {
        let pusher = RouterPusher::new(client, router_url, config.router_token.clone())
            .map_err(|e| RegistryError::invalid("router_url", e.to_string()))?;
        info!("pushing membership to {}", router_url);
        tokio::spawn(propagate::run_push_loop(
            Arc::clone(&registry),
            pusher,
            shutdown.clone(),
        ));
    } else {
        info!("no router configured, membership is available via /list only");
    }

    let state = AppState {
        registry,
        limiter: Arc::new(IpRateLimiter::new(
            config.limits.general,
            config.limits.sensitive,
        )),
        register_token: config.register_token.as_deref().map(Arc::from),
    };

    let mut signal = shutdown;
    hvpn_common::server::serve_with_shutdown(listener, api::app(state), &config.serve, async move {
        let _ = signal.wait_for(|stop| *stop).await;
    })
    .await?;
    Ok(())
}
