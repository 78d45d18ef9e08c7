//! Pull link from the registry.
//!
//! The registry pushes changes to `/update-servers`; this is the other way
//! into the same [`RouteTable::update_membership`]: a pull of `/list` at
//! startup (retried until it succeeds) and optionally on an interval.

use crate::error::SyncError;
use crate::metrics::counters;
use crate::table::RouteTable;
use hvpn_common::backoff::ExponentialBackoff;
use hvpn_common::endpoint::validate_relay_url;
use hvpn_common::RelayEntry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

const PULL_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches membership from a registry's `/list`.
#[derive(Clone)]
pub struct RegistryPuller {
    client: reqwest::Client,
    endpoint: Url,
}

impl RegistryPuller {
    /// Creates a puller for the registry at `registry_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `registry_url` cannot serve as a base URL.
    pub fn new(client: reqwest::Client, registry_url: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            client,
            endpoint: registry_url.join("/list")?,
        })
    }

    /// Fetches the current list. Entries with an invalid endpoint are
    /// dropped with a warning rather than failing the whole pull.
    ///
    /// # Errors
    ///
    /// [`SyncError::Http`] on transport or decode failure,
    /// [`SyncError::Status`] on a non-2xx answer.
    pub async fn fetch(&self) -> Result<Vec<RelayEntry>, SyncError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .timeout(PULL_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }
        let entries: Vec<RelayEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| match validate_relay_url(&entry.url) {
                Ok(_) => true,
                Err(e) => {
                    warn!(url = %entry.url, "ignoring pulled relay: {}", e);
                    false
                }
            })
            .collect())
    }

    /// Pulls once into `table`.
    ///
    /// # Errors
    ///
    /// Propagates [`RegistryPuller::fetch`] failures; the table is untouched.
    pub async fn pull_into(&self, table: &RouteTable) -> Result<usize, SyncError> {
        let entries = self.fetch().await?;
        Ok(table.update_membership(entries))
    }
}

/// Pulls until the first success, then every `resync` (if non-zero), until
/// `shutdown` flips to `true`.
pub async fn run_pull_loop(
    table: Arc<RouteTable>,
    puller: RegistryPuller,
    resync: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = ExponentialBackoff::for_sync();
    loop {
        let wait = match puller.pull_into(&table).await {
            Ok(count) => {
                counters::pulls_total("ok");
                info!(relays = count, "membership pulled from registry");
                backoff.reset();
                if resync.is_zero() {
                    return;
                }
                resync
            }
            Err(e) => {
                counters::pulls_total("failed");
                let delay = backoff.next_delay();
                warn!(
                    attempt = backoff.attempts(),
                    "registry pull failed, retrying in {:?}: {}", delay, e
                );
                delay
            }
        };

        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("pull loop stopping");
                    return;
                }
            }
        }
    }
}
