//! Relay endpoint validation and probe URL derivation.

use crate::types::HEALTH_PATH;
use thiserror::Error;
use url::Url;

/// Maximum accepted length of a relay endpoint URL.
pub const MAX_URL_LEN: usize = 2048;

/// Reasons a relay endpoint is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// The endpoint string is empty.
    #[error("url must not be empty")]
    Empty,
    /// The endpoint string exceeds [`MAX_URL_LEN`].
    #[error("url exceeds {MAX_URL_LEN} bytes")]
    TooLong,
    /// The endpoint is not a syntactically valid URI.
    #[error("malformed url: {0}")]
    Malformed(String),
    /// The endpoint uses a scheme other than `ws` or `wss`.
    #[error("url scheme must be ws or wss, got {0}")]
    Scheme(String),
    /// The endpoint has no host component.
    #[error("url must have a host")]
    MissingHost,
}

/// Parses and validates a relay tunnel endpoint.
///
/// Accepts only absolute `ws://` or `wss://` URLs with a host.
///
/// # Errors
///
/// Returns [`EndpointError`] describing the first violated rule.
///
/// # Examples
///
/// ```
/// use hvpn_common::endpoint::validate_relay_url;
/// assert!(validate_relay_url("wss://a.example/ws").is_ok());
/// assert!(validate_relay_url("https://a.example/ws").is_err());
/// ```
pub fn validate_relay_url(raw: &str) -> Result<Url, EndpointError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(EndpointError::Empty);
    }
    if raw.len() > MAX_URL_LEN {
        return Err(EndpointError::TooLong);
    }
    let url = Url::parse(raw).map_err(|e| EndpointError::Malformed(e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(EndpointError::Scheme(other.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(EndpointError::MissingHost);
    }
    Ok(url)
}

/// Parses the `http(s)://` base URL of a peer service. `name` labels the
/// setting in the error message.
///
/// # Errors
///
/// Returns a description if `raw` is not an absolute http or https URL.
pub fn parse_service_url(name: &str, raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("{name} is not a valid url: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("{name} scheme must be http or https, got {other}")),
    }
}

/// Derives the liveness probe URL served next to a relay's tunnel endpoint.
///
/// `ws` maps to `http`, `wss` to `https`; the path is replaced by `/health`
/// and any query or fragment is dropped.
#[must_use]
pub fn health_url(endpoint: &Url) -> Url {
    let mut probe = endpoint.clone();
    let scheme = if endpoint.scheme() == "wss" {
        "https"
    } else {
        "http"
    };
    // ws/wss and http/https are all "special" schemes, so this cannot fail.
    let _ = probe.set_scheme(scheme);
    probe.set_path(HEALTH_PATH);
    probe.set_query(None);
    probe.set_fragment(None);
    probe
}
