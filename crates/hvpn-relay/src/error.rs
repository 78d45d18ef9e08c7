use hvpn_common::server::ServeError;
use thiserror::Error;

/// A read or write failure on one leg of a tunnel. Always fatal to the
/// session.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Raw socket or pipe failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// WebSocket protocol or transport failure.
    #[error("websocket error: {0}")]
    WebSocket(Box<dyn std::error::Error + Send + Sync>),
}

/// Reasons an upgrade request is refused before tunneling.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandshakeError {
    /// No `Origin` header and the policy is not allow-all.
    #[error("missing origin header")]
    MissingOrigin,
    /// The origin is not on the allow-list.
    #[error("origin {0} is not trusted")]
    UntrustedOrigin(String),
    /// The client did not offer the tunnel subprotocol.
    #[error("subprotocol {0} is required")]
    MissingSubprotocol(&'static str),
}

/// Failure resolving or dialing the egress side of a session.
#[derive(Error, Debug)]
pub enum EgressError {
    /// The egress setting cannot be parsed.
    #[error("invalid egress {0:?}: {1}")]
    Invalid(String, String),
    /// Connecting to the egress destination failed.
    #[error("egress dial failed: {0}")]
    Dial(#[from] TransportError),
}

/// Errors that can occur while running the relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The outbound HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
    /// The HTTP listener failed.
    #[error("serve error: {0}")]
    Serve(#[from] ServeError),
}

/// Failure talking to the registry or the tunnel agent. Logged and retried.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The peer answered with a non-success status.
    #[error("peer responded with status {0}")]
    Status(u16),
    /// A request URL could not be built.
    #[error("bad url: {0}")]
    Url(#[from] url::ParseError),
    /// The tunnel agent reported no tunnels.
    #[error("no tunnel reported")]
    NoTunnel,
}
