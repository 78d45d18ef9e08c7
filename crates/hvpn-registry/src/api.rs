//! HTTP surface: `/register`, `/list`, `/health`.

use crate::metrics::{counters, gauges};
use crate::store::Registry;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use hvpn_common::auth::require_bearer;
use hvpn_common::client_ip::client_ip;
use hvpn_common::ratelimit::{IpRateLimiter, Tier};
use hvpn_common::types::{RegisterRequest, RegisterResponse, RelayEntry, HEALTH_BODY, HEALTH_PATH};
use hvpn_common::ApiError;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state behind every registry handler.
#[derive(Clone)]
pub struct AppState {
    /// Membership table.
    pub registry: Arc<Registry>,
    /// Per-caller request limiter.
    pub limiter: Arc<IpRateLimiter>,
    /// Bearer token required on `/register`, if any.
    pub register_token: Option<Arc<str>>,
}

/// Builds the registry's axum router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/list", get(list))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

async fn register(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let ip = client_ip(&headers, &peer);
    state.limiter.check(ip, Tier::Sensitive)?;
    if let Some(ref token) = state.register_token {
        if let Err(e) = require_bearer(&headers, token) {
            warn!(%ip, "registration rejected: {}", e);
            counters::registrations_total("unauthorized");
            return Err(e);
        }
    }

    let Json(request) = body?;
    let registered = match state.registry.register(request, Some(ip)).await {
        Ok(registered) => registered,
        Err(e) => {
            counters::registrations_total("rejected");
            return Err(e.into());
        }
    };

    let record = &registered.record;
    counters::registrations_total("accepted");
    gauges::set_relays_registered(state.registry.len());
    info!(
        relay_id = %record.id,
        location = %record.location,
        url = %record.url,
        %ip,
        changed = registered.membership_changed,
        "relay registered"
    );

    Ok(Json(RegisterResponse {
        status: "registered".to_string(),
        server_id: registered.record.id,
    }))
}

async fn list(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Vec<RelayEntry>>, ApiError> {
    state
        .limiter
        .check(client_ip(&headers, &peer), Tier::General)?;
    Ok(Json(state.registry.list()))
}

async fn health() -> &'static str {
    HEALTH_BODY
}
