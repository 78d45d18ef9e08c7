//! Periodic liveness sweep over every registered relay.

use crate::metrics::counters;
use crate::store::{RelayRecord, Registry};
use futures_util::stream::{self, StreamExt};
use hvpn_common::endpoint::{health_url, validate_relay_url};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Probes in flight at once during a sweep.
const PROBE_CONCURRENCY: usize = 32;

/// What a single sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records probed.
    pub probed: usize,
    /// Records whose `last_seen` was refreshed.
    pub refreshed: usize,
    /// Records removed after a failed probe.
    pub evicted: usize,
}

/// Probes a relay's health endpoint. Only a 2xx answer within `timeout`
/// counts as alive.
pub async fn probe(client: &reqwest::Client, endpoint: &str, timeout: Duration) -> bool {
    let url = match validate_relay_url(endpoint) {
        Ok(url) => health_url(&url),
        Err(e) => {
            warn!(endpoint, "stored endpoint no longer parses: {}", e);
            return false;
        }
    };
    match client.get(url.clone()).timeout(timeout).send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            debug!(%url, status = %resp.status(), "probe failed");
            false
        }
        Err(e) => {
            debug!(%url, "probe failed: {}", e);
            false
        }
    }
}

/// Probes every record once, refreshing live relays and evicting dead ones.
///
/// Probes run concurrently off the request path. A record that was
/// re-registered while its probe was in flight is left alone.
pub async fn sweep_once(
    registry: &Registry,
    client: &reqwest::Client,
    timeout: Duration,
) -> SweepReport {
    let records = registry.records();
    let mut report = SweepReport {
        probed: records.len(),
        ..SweepReport::default()
    };

    let results: Vec<(RelayRecord, bool)> = stream::iter(records)
        .map(|record| async move {
            let alive = probe(client, &record.url, timeout).await;
            (record, alive)
        })
        .buffer_unordered(PROBE_CONCURRENCY)
        .collect()
        .await;

    for (record, alive) in results {
        counters::probes_total(if alive { "ok" } else { "failed" });
        if alive {
            match registry.touch(&record.id, record.registered_at).await {
                Ok(true) => report.refreshed += 1,
                Ok(false) => {}
                Err(e) => warn!(relay_id = %record.id, "failed to persist refresh: {}", e),
            }
        } else {
            match registry.evict_if(&record.id, record.registered_at).await {
                Ok(true) => {
                    info!(relay_id = %record.id, url = %record.url, "evicted unresponsive relay");
                    counters::evictions_total();
                    report.evicted += 1;
                }
                Ok(false) => debug!(relay_id = %record.id, "relay re-registered during probe"),
                Err(e) => warn!(relay_id = %record.id, "failed to persist eviction: {}", e),
            }
        }
    }

    crate::metrics::gauges::set_relays_registered(registry.len());
    report
}

/// Runs [`sweep_once`] every `interval` until `shutdown` flips to `true`.
pub async fn run_sweeper(
    registry: Arc<Registry>,
    client: reqwest::Client,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sweep_once(&registry, &client, timeout).await;
                if report.probed > 0 {
                    info!(
                        probed = report.probed,
                        refreshed = report.refreshed,
                        evicted = report.evicted,
                        "health sweep complete"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("sweeper stopping");
                    return;
                }
            }
        }
    }
}
