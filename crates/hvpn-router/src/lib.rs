//! hvpn router: assigns each client a relay and remembers the decision.
//!
//! Membership arrives two ways, both ending in
//! [`table::RouteTable::update_membership`]: pushes from the registry on
//! `/update-servers`, and pulls of the registry's `/list`.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// HTTP handlers.
pub mod api;
/// CLI argument parsing and router configuration.
pub mod config;
/// Error types for router operations.
pub mod error;
/// Prometheus counters and gauges.
pub mod metrics;
/// Registry pull link.
pub mod sync;
/// Membership snapshot and route assignment cache.
pub mod table;

use crate::api::AppState;
use crate::config::RouterConfig;
use crate::sync::RegistryPuller;
use crate::table::RouteTable;
use hvpn_common::ratelimit::IpRateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

pub use error::{RouterError, SyncError};
pub use table::{Route, RouteError, RouteSource};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Builds the route table described by `config`.
#[must_use]
pub fn route_table(config: &RouterConfig) -> Arc<RouteTable> {
    Arc::new(RouteTable::new(
        config.fallback_relay.clone(),
        config.route_ttl,
    ))
}

/// Runs the router until the process ends.
///
/// # Errors
///
/// Returns an error if background tasks cannot be set up or the listener fails.
pub async fn run(
    listener: TcpListener,
    table: Arc<RouteTable>,
    config: &RouterConfig,
) -> Result<(), RouterError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    run_with_shutdown(listener, table, config, shutdown_rx).await
}

/// Runs the router until `shutdown` flips to `true`.
///
/// # Errors
///
/// Returns an error if background tasks cannot be set up or the listener fails.
pub async fn run_with_shutdown(
    listener: TcpListener,
    table: Arc<RouteTable>,
    config: &RouterConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), RouterError> {
    if let Some(ref registry_url) = config.registry_url {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hvpn-router/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let puller = RegistryPuller::new(client, registry_url)
            .map_err(|e| RouterError::Url("registry", e))?;
        info!("pulling membership from {}", registry_url);
        tokio::spawn(sync::run_pull_loop(
            Arc::clone(&table),
            puller,
            config.resync_interval,
            shutdown.clone(),
        ));
    }
    if config.push_token.is_none() {
        info!("no push token configured, /update-servers is disabled");
    }

    tokio::spawn(purge_loop(Arc::clone(&table), shutdown.clone()));

    let state = AppState {
        table,
        limiter: Arc::new(IpRateLimiter::new(
            config.limits.general,
            config.limits.sensitive,
        )),
        push_token: config.push_token.as_deref().map(Arc::from),
    };

    let mut signal = shutdown;
    hvpn_common::server::serve_with_shutdown(listener, api::app(state), &config.serve, async move {
        let _ = signal.wait_for(|stop| *stop).await;
    })
    .await?;
    Ok(())
}

async fn purge_loop(table: Arc<RouteTable>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = table.purge_expired();
                if purged > 0 {
                    debug!(purged, "expired route assignments dropped");
                }
                metrics::gauges::set_assignments_cached(table.cached());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
