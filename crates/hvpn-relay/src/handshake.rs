//! Upgrade request checks: trusted `Origin` and the tunnel subprotocol.

use crate::error::HandshakeError;
use axum::http::header::{ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use axum::http::HeaderMap;
use hvpn_common::types::TUNNEL_SUBPROTOCOL;
use std::collections::HashSet;
use tracing::warn;

/// Origins trusted without configuration.
pub const DEFAULT_ORIGINS: &[&str] = &[
    "http://localhost",
    "https://localhost",
    "http://127.0.0.1",
    "https://127.0.0.1",
];

/// Which browser origins may open a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Any origin, including none. Insecure.
    AllowAll,
    /// Exact matches only.
    AllowList(HashSet<String>),
}

impl OriginPolicy {
    /// The localhost defaults plus `extra`. A `*` entry switches to
    /// [`OriginPolicy::AllowAll`].
    pub fn with_trusted<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut origins: HashSet<String> = DEFAULT_ORIGINS.iter().map(|s| (*s).to_string()).collect();
        for origin in extra {
            let origin = origin.as_ref().trim();
            if origin == "*" {
                warn!("origin policy is allow-all: any website can open tunnels through this relay");
                return Self::AllowAll;
            }
            if !origin.is_empty() {
                origins.insert(origin.to_string());
            }
        }
        Self::AllowList(origins)
    }

    /// Checks the request's `Origin`.
    ///
    /// # Errors
    ///
    /// [`HandshakeError::MissingOrigin`] or [`HandshakeError::UntrustedOrigin`].
    pub fn check(&self, headers: &HeaderMap) -> Result<(), HandshakeError> {
        let allowed = match self {
            Self::AllowAll => return Ok(()),
            Self::AllowList(allowed) => allowed,
        };
        let origin = headers
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(HandshakeError::MissingOrigin)?;
        if allowed.contains(origin) {
            Ok(())
        } else {
            Err(HandshakeError::UntrustedOrigin(origin.to_string()))
        }
    }
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self::with_trusted(std::iter::empty::<&str>())
    }
}

/// Returns `true` if the client offered the tunnel subprotocol.
#[must_use]
pub fn offers_subprotocol(headers: &HeaderMap) -> bool {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == TUNNEL_SUBPROTOCOL)
}

/// Validates an upgrade request before any tunnel state exists.
///
/// # Errors
///
/// The first failed check, origin first.
pub fn validate_upgrade(policy: &OriginPolicy, headers: &HeaderMap) -> Result<(), HandshakeError> {
    policy.check(headers)?;
    if !offers_subprotocol(headers) {
        return Err(HandshakeError::MissingSubprotocol(TUNNEL_SUBPROTOCOL));
    }
    Ok(())
}
