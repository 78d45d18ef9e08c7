//! Membership snapshot plus per-client route assignments.
//!
//! Readers load the snapshot without locking; membership updates swap in a
//! complete new snapshot so a lookup never sees a half-applied list.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use hvpn_common::RelayEntry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Routing failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// No relay matches and no fallback is configured.
    #[error("no relay available")]
    NoRelayAvailable,
}

/// A cached routing decision. Replaced, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAssignment {
    /// Requester identity.
    pub client_key: String,
    /// Relay the requester was sent to.
    pub relay_endpoint: String,
    /// When the decision was made.
    pub cached_at: Instant,
}

/// Where a route answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    /// A live cached assignment.
    Cache,
    /// A fresh selection from the membership snapshot.
    Match,
    /// The configured fallback relay.
    Fallback,
}

impl RouteSource {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Match => "match",
            Self::Fallback => "fallback",
        }
    }
}

/// A routing answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Relay endpoint handed to the client.
    pub endpoint: String,
    /// How the endpoint was chosen.
    pub source: RouteSource,
}

#[derive(Debug, Default)]
struct Snapshot {
    entries: Vec<RelayEntry>,
    endpoints: HashSet<String>,
}

impl Snapshot {
    fn new(entries: Vec<RelayEntry>) -> Self {
        let endpoints = entries.iter().map(|e| e.url.clone()).collect();
        Self { entries, endpoints }
    }

    /// First relay registered under `hint`; with no hint, the first relay.
    fn select(&self, hint: &str) -> Option<&RelayEntry> {
        if hint.is_empty() {
            self.entries.first()
        } else {
            self.entries.iter().find(|e| e.location == hint)
        }
    }
}

/// The router's view of live relays and the decisions made against it.
#[derive(Debug)]
pub struct RouteTable {
    snapshot: ArcSwap<Snapshot>,
    assignments: DashMap<String, RouteAssignment>,
    fallback: Option<String>,
    ttl: Duration,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(fallback: Option<String>, ttl: Duration) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            assignments: DashMap::new(),
            fallback,
            ttl,
        }
    }

    /// Returns the relay for `client_key`.
    ///
    /// A live cached assignment wins over `location_hint`. Otherwise the
    /// first relay whose location equals the hint is chosen, then the
    /// fallback. The decision is cached before it is returned.
    ///
    /// # Errors
    ///
    /// [`RouteError::NoRelayAvailable`] if nothing matches and no fallback
    /// is configured.
    pub fn get_route(&self, client_key: &str, location_hint: &str) -> Result<Route, RouteError> {
        let snapshot = self.snapshot.load();

        if let Some(cached) = self.assignments.get(client_key) {
            if self.is_live(&snapshot, &cached) {
                return Ok(Route {
                    endpoint: cached.relay_endpoint.clone(),
                    source: RouteSource::Cache,
                });
            }
        }

        let hint = location_hint.trim();
        let route = if let Some(entry) = snapshot.select(hint) {
            Route {
                endpoint: entry.url.clone(),
                source: RouteSource::Match,
            }
        } else if let Some(ref fallback) = self.fallback {
            Route {
                endpoint: fallback.clone(),
                source: RouteSource::Fallback,
            }
        } else {
            self.assignments.remove(client_key);
            return Err(RouteError::NoRelayAvailable);
        };

        debug!(client = client_key, hint, endpoint = %route.endpoint, "route assigned");
        self.assignments.insert(
            client_key.to_string(),
            RouteAssignment {
                client_key: client_key.to_string(),
                relay_endpoint: route.endpoint.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(route)
    }

    /// Replaces the membership snapshot and drops every assignment whose
    /// relay is gone. Returns the number of relays in the new snapshot.
    pub fn update_membership(&self, entries: Vec<RelayEntry>) -> usize {
        let next = Arc::new(Snapshot::new(entries));
        let count = next.entries.len();
        self.snapshot.store(Arc::clone(&next));

        let before = self.assignments.len();
        self.assignments.retain(|_, assignment| {
            next.endpoints.contains(&assignment.relay_endpoint)
                || self.is_fallback(&assignment.relay_endpoint)
        });
        let invalidated = before.saturating_sub(self.assignments.len());
        info!(relays = count, invalidated, "membership updated");
        count
    }

    /// Drops assignments older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.assignments.len();
        let ttl = self.ttl;
        self.assignments
            .retain(|_, assignment| assignment.cached_at.elapsed() < ttl);
        before.saturating_sub(self.assignments.len())
    }

    /// Current membership.
    #[must_use]
    pub fn members(&self) -> Vec<RelayEntry> {
        self.snapshot.load().entries.clone()
    }

    /// Cached assignment for `client_key`, if any.
    #[must_use]
    pub fn assignment(&self, client_key: &str) -> Option<RouteAssignment> {
        self.assignments.get(client_key).map(|a| a.value().clone())
    }

    /// Number of cached assignments.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.assignments.len()
    }

    fn is_fallback(&self, endpoint: &str) -> bool {
        self.fallback.as_deref() == Some(endpoint)
    }

    fn is_live(&self, snapshot: &Snapshot, assignment: &RouteAssignment) -> bool {
        assignment.cached_at.elapsed() < self.ttl
            && (snapshot.endpoints.contains(&assignment.relay_endpoint)
                || self.is_fallback(&assignment.relay_endpoint))
    }
}
