//! Wire types and protocol constants shared across the hvpn services.

use serde::{Deserialize, Serialize};

/// WebSocket subprotocol every tunnel client must request.
pub const TUNNEL_SUBPROTOCOL: &str = "vpn-protocol";

/// Path of the tunnel upgrade endpoint on a relay.
pub const TUNNEL_PATH: &str = "/ws";

/// Path of the liveness endpoint served by every service.
pub const HEALTH_PATH: &str = "/health";

/// Body returned by every liveness endpoint.
pub const HEALTH_BODY: &str = "OK";

/// Identity-less projection of a registered relay, as listed by the registry
/// and pushed to the router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayEntry {
    /// Location label the relay registered under (e.g. a country name).
    pub location: String,
    /// `ws://` or `wss://` tunnel endpoint.
    pub url: String,
}

impl RelayEntry {
    /// Convenience constructor.
    pub fn new(location: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            url: url.into(),
        }
    }
}

/// `POST /register` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Relay identifier chosen by the relay.
    pub id: String,
    /// Location label.
    pub location: String,
    /// Tunnel endpoint.
    pub url: String,
}

/// `POST /register` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Always `"registered"`.
    pub status: String,
    /// Identifier the record is stored under (may differ from the request
    /// when the registry minted a fresh one).
    #[serde(rename = "serverId")]
    pub server_id: String,
}

/// `POST /route` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Location hint; empty means no preference.
    #[serde(default)]
    pub location: String,
}

/// `POST /update-servers` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    /// Always `"updated"`.
    pub status: String,
    /// Number of relays in the accepted snapshot.
    #[serde(rename = "serverCount")]
    pub server_count: usize,
}
