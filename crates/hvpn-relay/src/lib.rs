//! hvpn relay: the tunnel endpoint.
//!
//! Each accepted `/ws` upgrade becomes a session that pairs the client's
//! WebSocket with an egress leg and relays bytes both ways until either
//! side closes.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Self-registration with the registry.
pub mod announce;
/// HTTP and WebSocket handlers.
pub mod api;
/// CLI argument parsing and relay configuration.
pub mod config;
/// The duplex stream abstraction and its transports.
pub mod duplex;
/// Egress destinations.
pub mod egress;
/// Error types for relay operations.
pub mod error;
/// Upgrade request validation.
pub mod handshake;
/// Prometheus counters and gauges.
pub mod metrics;
/// Tunnel sessions.
pub mod tunnel;

use crate::announce::Announcer;
use crate::api::AppState;
use crate::config::RelayConfig;
use hvpn_common::ratelimit::IpRateLimiter;
use hvpn_common::types::RegisterRequest;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

pub use error::{EgressError, HandshakeError, RelayError, TransportError};

/// Runs the relay until the process ends.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn run(listener: TcpListener, config: &RelayConfig) -> Result<(), RelayError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    run_with_shutdown(listener, config, shutdown_rx).await
}

/// Runs the relay until `shutdown` flips to `true`. Open tunnels are not
/// interrupted; shutdown waits for them up to the serving loop's drain
/// period.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn run_with_shutdown(
    listener: TcpListener,
    config: &RelayConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), RelayError> {
    info!(egress = %config.egress, "relay egress");

    if let Some(ref registry_url) = config.registry_url {
        let port = listener.local_addr().map_err(hvpn_common::server::ServeError::Io)?.port();
        let client = reqwest::Client::builder()
            .user_agent(concat!("hvpn-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        spawn_announcer(client, registry_url.clone(), config.clone(), port, shutdown.clone());
    }

    let state = AppState {
        origins: Arc::new(config.origins.clone()),
        egress: Arc::new(config.egress.clone()),
        limiter: Arc::new(IpRateLimiter::new(
            config.limits.general,
            config.limits.sensitive,
        )),
    };

    let mut signal = shutdown;
    hvpn_common::server::serve_with_shutdown(listener, api::app(state), &config.serve, async move {
        let _ = signal.wait_for(|stop| *stop).await;
    })
    .await?;
    Ok(())
}

fn spawn_announcer(
    client: reqwest::Client,
    registry_url: url::Url,
    config: RelayConfig,
    port: u16,
    shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let url = match (&config.public_url, &config.cloudflared_api) {
            (Some(url), _) => url.clone(),
            (None, Some(api)) => announce::wait_for_public_url(&client, api).await,
            (None, None) => config.local_endpoint(port),
        };
        let request = RegisterRequest {
            id: config.relay_id.clone(),
            location: config.location.clone(),
            url,
        };
        match Announcer::new(client, &registry_url, config.register_token.clone(), request) {
            Ok(announcer) => {
                announce::run_announce_loop(announcer, config.reregister_interval, shutdown).await;
            }
            Err(e) => warn!("cannot register with {}: {}", registry_url, e),
        }
    });
}
