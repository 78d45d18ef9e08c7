//! HTTP surface: the `/ws` tunnel upgrade and `/health`.

use crate::duplex::WsDuplex;
use crate::egress::Egress;
use crate::error::HandshakeError;
use crate::handshake::{validate_upgrade, OriginPolicy};
use crate::metrics::{counters, gauges};
use crate::tunnel::{SessionState, TunnelSession};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use hvpn_common::client_ip::client_ip;
use hvpn_common::ratelimit::{IpRateLimiter, Tier};
use hvpn_common::server::ConnectionSlot;
use hvpn_common::types::{HEALTH_BODY, HEALTH_PATH, TUNNEL_PATH, TUNNEL_SUBPROTOCOL};
use hvpn_common::ApiError;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state behind every relay handler.
#[derive(Clone)]
pub struct AppState {
    /// Trusted origins.
    pub origins: Arc<OriginPolicy>,
    /// Egress for every session.
    pub egress: Arc<Egress>,
    /// Per-caller upgrade limiter.
    pub limiter: Arc<IpRateLimiter>,
}

/// Builds the relay's axum router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route(TUNNEL_PATH, get(tunnel))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

impl From<HandshakeError> for ApiError {
    fn from(e: HandshakeError) -> Self {
        match e {
            HandshakeError::MissingOrigin | HandshakeError::UntrustedOrigin(_) => {
                ApiError::Forbidden(e.to_string())
            }
            HandshakeError::MissingSubprotocol(_) => ApiError::Validation(e.to_string()),
        }
    }
}

async fn tunnel(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    slot: Option<Extension<ConnectionSlot>>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let ip = client_ip(&headers, &peer);
    debug!(%ip, state = %SessionState::AwaitingUpgrade, "upgrade requested");
    if let Err(e) = state.limiter.check(ip, Tier::General) {
        counters::sessions_total("rate_limited");
        return e.into_response();
    }
    if let Err(e) = validate_upgrade(&state.origins, &headers) {
        warn!(%ip, "upgrade rejected: {}", e);
        counters::sessions_total("rejected");
        return ApiError::from(e).into_response();
    }

    upgrade
        .protocols([TUNNEL_SUBPROTOCOL])
        .on_upgrade(move |socket| run_session(socket, state.egress, ip, slot))
}

/// Holding `_slot` keeps the tunnel counted against the listener's
/// connection limit until the session ends.
async fn run_session(
    socket: WebSocket,
    egress: Arc<Egress>,
    ip: IpAddr,
    _slot: Option<Extension<ConnectionSlot>>,
) {
    debug!(%ip, state = %SessionState::HandshakeValidated, "dialing egress");
    let egress_leg = match egress.dial().await {
        Ok(leg) => leg,
        Err(e) => {
            warn!(%ip, %egress, "closing session: {}", e);
            counters::sessions_total("egress_failed");
            return;
        }
    };

    info!(%ip, %egress, "tunnel opened");
    gauges::inc_sessions_active();
    let report = TunnelSession::new(Box::new(WsDuplex::new(socket, "ws")), egress_leg)
        .run()
        .await;
    gauges::dec_sessions_active();
    counters::sessions_total(if report.clean() { "closed" } else { "failed" });
    info!(
        %ip,
        up_bytes = report.upstream.bytes,
        down_bytes = report.downstream.bytes,
        "tunnel closed"
    );
}

async fn health() -> &'static str {
    HEALTH_BODY
}
