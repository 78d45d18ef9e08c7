//! HTTP surface: `/route`, `/update-servers`, `/health`.

use crate::metrics::{counters, gauges};
use crate::table::{RouteError, RouteTable};
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use hvpn_common::auth::require_bearer;
use hvpn_common::client_ip::client_ip;
use hvpn_common::endpoint::validate_relay_url;
use hvpn_common::ratelimit::{IpRateLimiter, Tier};
use hvpn_common::types::{RouteRequest, UpdateResponse, HEALTH_BODY, HEALTH_PATH};
use hvpn_common::{ApiError, RelayEntry};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest membership list accepted in one push.
const MAX_PUSH_ENTRIES: usize = 10_000;

/// Shared state behind every router handler.
#[derive(Clone)]
pub struct AppState {
    /// Membership snapshot and assignment cache.
    pub table: Arc<RouteTable>,
    /// Per-caller request limiter.
    pub limiter: Arc<IpRateLimiter>,
    /// Bearer accepted on `/update-servers`. Pushes are refused when unset.
    pub push_token: Option<Arc<str>>,
}

/// Builds the router's axum router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/route", post(route))
        .route("/update-servers", post(update_servers))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

async fn route(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<RouteRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let ip = client_ip(&headers, &peer);
    state.limiter.check(ip, Tier::General)?;
    let Json(request) = body?;

    let client_key = ip.to_string();
    match state.table.get_route(&client_key, &request.location) {
        Ok(route) => {
            counters::routes_total(route.source.as_str());
            gauges::set_assignments_cached(state.table.cached());
            debug!(%ip, location = %request.location, source = route.source.as_str(), "routed");
            Ok(route.endpoint)
        }
        Err(RouteError::NoRelayAvailable) => {
            counters::routes_total("none");
            debug!(%ip, location = %request.location, "no relay available");
            Err(ApiError::NoRelayAvailable)
        }
    }
}

async fn update_servers(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<Vec<RelayEntry>>, JsonRejection>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let ip = client_ip(&headers, &peer);
    let Some(ref token) = state.push_token else {
        counters::updates_total("disabled");
        return Err(ApiError::Forbidden("membership push is disabled".to_string()));
    };
    if let Err(e) = require_bearer(&headers, token) {
        // Only failed attempts count against the limit.
        state.limiter.check(ip, Tier::Sensitive)?;
        warn!(%ip, "membership push rejected: {}", e);
        counters::updates_total("unauthorized");
        return Err(e);
    }

    let Json(entries) = body?;
    let entries = normalize_entries(entries);
    if let Err(e) = validate_entries(&entries) {
        counters::updates_total("invalid");
        return Err(e);
    }

    let count = state.table.update_membership(entries);
    counters::updates_total("ok");
    gauges::set_relays_known(count);
    gauges::set_assignments_cached(state.table.cached());
    Ok(Json(UpdateResponse {
        status: "updated".to_string(),
        server_count: count,
    }))
}

/// Trims both fields so the table holds exactly what was validated.
fn normalize_entries(entries: Vec<RelayEntry>) -> Vec<RelayEntry> {
    entries
        .into_iter()
        .map(|entry| RelayEntry::new(entry.location.trim(), entry.url.trim()))
        .collect()
}

fn validate_entries(entries: &[RelayEntry]) -> Result<(), ApiError> {
    if entries.len() > MAX_PUSH_ENTRIES {
        return Err(ApiError::Validation(format!(
            "membership exceeds {MAX_PUSH_ENTRIES} entries"
        )));
    }
    for (i, entry) in entries.iter().enumerate() {
        if entry.location.trim().is_empty() {
            return Err(ApiError::Validation(format!(
                "entry {i}: location must not be empty"
            )));
        }
        validate_relay_url(&entry.url)
            .map_err(|e| ApiError::Validation(format!("entry {i}: {e}")))?;
    }
    Ok(())
}

async fn health() -> &'static str {
    HEALTH_BODY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_entries_accepts_good_list() {
        let entries = vec![
            RelayEntry::new("us", "wss://a.example/ws"),
            RelayEntry::new("eu", "ws://10.0.0.2:8080/ws"),
        ];
        assert!(validate_entries(&entries).is_ok());
    }

    #[test]
    fn validate_entries_names_bad_index() {
        let entries = vec![
            RelayEntry::new("us", "wss://a.example/ws"),
            RelayEntry::new("eu", "https://b.example/ws"),
        ];
        let err = validate_entries(&entries).unwrap_err();
        assert!(err.to_string().starts_with("entry 1"));
    }

    #[test]
    fn pushed_entries_are_trimmed() {
        let entries = normalize_entries(vec![RelayEntry::new(" us ", " wss://x.example/ws ")]);
        assert_eq!(entries, vec![RelayEntry::new("us", "wss://x.example/ws")]);
        assert!(validate_entries(&entries).is_ok());
    }

    #[test]
    fn validate_entries_rejects_blank_location() {
        let entries = vec![RelayEntry::new(" ", "wss://a.example/ws")];
        assert!(matches!(
            validate_entries(&entries),
            Err(ApiError::Validation(_))
        ));
    }
}
