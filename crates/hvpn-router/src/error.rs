use hvpn_common::server::ServeError;
use thiserror::Error;

/// Errors that can occur while running the router.
#[derive(Error, Debug)]
pub enum RouterError {
    /// A configured URL cannot be used.
    #[error("invalid {0} url: {1}")]
    Url(&'static str, url::ParseError),
    /// The outbound HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
    /// The HTTP listener failed.
    #[error("serve error: {0}")]
    Serve(#[from] ServeError),
}

/// Failure pulling membership from the registry. Logged and retried.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport-level or decoding failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The registry answered with a non-success status.
    #[error("registry responded with status {0}")]
    Status(u16),
}
