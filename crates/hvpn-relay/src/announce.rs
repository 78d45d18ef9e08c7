//! Self-registration with the registry.
//!
//! The relay registers until accepted, then refreshes the registration on a
//! fixed interval. The public endpoint it advertises is either configured or
//! discovered from a local tunnel agent.

use crate::error::SyncError;
use crate::metrics::counters;
use hvpn_common::backoff::ExponentialBackoff;
use hvpn_common::types::{RegisterRequest, RegisterResponse};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Registers this relay with a registry.
#[derive(Clone)]
pub struct Announcer {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
    request: RegisterRequest,
}

impl Announcer {
    /// Creates an announcer for the registry at `registry_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `registry_url` cannot serve as a base URL.
    pub fn new(
        client: reqwest::Client,
        registry_url: &Url,
        token: Option<String>,
        request: RegisterRequest,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            endpoint: registry_url.join("/register")?,
            token,
            request,
        })
    }

    /// Id the relay currently registers under.
    #[must_use]
    pub fn relay_id(&self) -> &str {
        &self.request.id
    }

    /// Sends one registration. When the registry assigns a different id,
    /// later registrations use it.
    ///
    /// # Errors
    ///
    /// [`SyncError::Http`] on transport failure, [`SyncError::Status`] if the
    /// registry refuses.
    pub async fn register_once(&mut self) -> Result<RegisterResponse, SyncError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .timeout(REQUEST_TIMEOUT)
            .json(&self.request);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }
        let body: RegisterResponse = response.json().await?;
        if body.server_id != self.request.id {
            info!(
                requested = %self.request.id,
                assigned = %body.server_id,
                "registry assigned a relay id"
            );
            self.request.id = body.server_id.clone();
        }
        Ok(body)
    }
}

/// Registers until accepted, then every `interval` (zero: once), until
/// `shutdown` flips to `true`.
pub async fn run_announce_loop(
    mut announcer: Announcer,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = ExponentialBackoff::for_sync();
    loop {
        let wait = match announcer.register_once().await {
            Ok(_) => {
                counters::registrations_total("ok");
                info!(
                    relay_id = %announcer.relay_id(),
                    url = %announcer.request.url,
                    location = %announcer.request.location,
                    "registered with registry"
                );
                backoff.reset();
                if interval.is_zero() {
                    return;
                }
                interval
            }
            Err(e) => {
                counters::registrations_total("failed");
                let delay = backoff.next_delay();
                warn!(
                    attempt = backoff.attempts(),
                    "registration failed, retrying in {:?}: {}", delay, e
                );
                delay
            }
        };

        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("announce loop stopping");
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<TunnelInfo>,
}

#[derive(Debug, Deserialize)]
struct TunnelInfo {
    #[serde(default)]
    name: String,
    public_url: String,
}

/// Converts a tunnel's public `http(s)` URL into the relay's `ws(s)` tunnel
/// endpoint.
#[must_use]
pub fn tunnel_endpoint(public_url: &str) -> String {
    let base = public_url.trim().trim_end_matches('/');
    let converted = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{converted}{}", hvpn_common::types::TUNNEL_PATH)
}

/// Asks a local tunnel agent's API (`GET /api/tunnels`) for this relay's
/// public address. A tunnel whose name mentions `vpn` is preferred, then the
/// first one listed.
///
/// # Errors
///
/// Fails on transport errors, a non-2xx answer, or an empty tunnel list.
pub async fn discover_public_url(client: &reqwest::Client, api: &Url) -> Result<String, SyncError> {
    let endpoint = api.join("/api/tunnels")?;
    let response = client
        .get(endpoint)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::Status(status.as_u16()));
    }
    let list: TunnelList = response.json().await?;
    let chosen = list
        .tunnels
        .iter()
        .find(|t| t.name.contains("vpn"))
        .or_else(|| list.tunnels.first())
        .ok_or(SyncError::NoTunnel)?;
    Ok(tunnel_endpoint(&chosen.public_url))
}

/// Polls [`discover_public_url`] every five seconds until it succeeds.
pub async fn wait_for_public_url(client: &reqwest::Client, api: &Url) -> String {
    loop {
        match discover_public_url(client, api).await {
            Ok(url) => {
                info!(%url, "public tunnel endpoint discovered");
                return url;
            }
            Err(e) => {
                info!("waiting for tunnel agent: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
