//! Push link from the registry to the router.
//!
//! Membership is pushed once at startup and again after every change. A
//! failed push is retried with backoff; changes that land while a push is
//! pending are coalesced, so the router always receives the latest list.

use crate::error::SyncError;
use crate::metrics::counters;
use crate::store::Registry;
use hvpn_common::backoff::ExponentialBackoff;
use hvpn_common::types::{RelayEntry, UpdateResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends membership snapshots to a router's `/update-servers`.
#[derive(Clone)]
pub struct RouterPusher {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl RouterPusher {
    /// Creates a pusher for the router at `router_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `router_url` cannot serve as a base URL.
    pub fn new(
        client: reqwest::Client,
        router_url: &Url,
        token: Option<String>,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            endpoint: router_url.join("/update-servers")?,
            token,
        })
    }

    /// Pushes `entries` and returns the server count the router accepted.
    ///
    /// # Errors
    ///
    /// [`SyncError::Http`] on transport failure, [`SyncError::Status`] if the
    /// router answers with a non-2xx status.
    pub async fn push(&self, entries: &[RelayEntry]) -> Result<usize, SyncError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .timeout(PUSH_TIMEOUT)
            .json(entries);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }
        let body: UpdateResponse = response.json().await?;
        Ok(body.server_count)
    }
}

/// Pushes membership to the router until `shutdown` flips to `true`.
pub async fn run_push_loop(
    registry: Arc<Registry>,
    pusher: RouterPusher,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut changes = registry.subscribe();
    let mut backoff = ExponentialBackoff::for_sync();

    loop {
        changes.borrow_and_update();
        let entries = registry.list();
        match pusher.push(&entries).await {
            Ok(count) => {
                counters::pushes_total("ok");
                info!(relays = count, "membership pushed to router");
                backoff.reset();
            }
            Err(e) => {
                counters::pushes_total("failed");
                let delay = backoff.next_delay();
                warn!(
                    attempt = backoff.attempts(),
                    "router push failed, retrying in {:?}: {}", delay, e
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => continue,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                        continue;
                    }
                }
            }
        }

        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("registry dropped, push loop stopping");
                    return;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("push loop stopping");
                    return;
                }
            }
        }
    }
}
