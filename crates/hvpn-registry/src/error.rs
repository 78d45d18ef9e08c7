use hvpn_common::endpoint::EndpointError;
use hvpn_common::server::ServeError;
use hvpn_common::ApiError;
use thiserror::Error;

/// Errors that can occur during registry operation.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A registration field is missing or malformed.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Offending request field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
    /// The id belongs to a different registrant.
    #[error("relay id {0} is registered to another owner")]
    Conflict(String),
    /// The durable store failed.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    /// A stored record could not be encoded or decoded.
    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    /// The outbound HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
    /// The HTTP listener failed.
    #[error("serve error: {0}")]
    Serve(#[from] ServeError),
}

impl RegistryError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl From<EndpointError> for RegistryError {
    fn from(e: EndpointError) -> Self {
        Self::invalid("url", e.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Validation { .. } => ApiError::Validation(e.to_string()),
            RegistryError::Conflict(_) => ApiError::Conflict(e.to_string()),
            other => {
                tracing::error!("registry failure: {}", other);
                ApiError::Internal
            }
        }
    }
}

/// Failure pushing membership to the router. Logged and retried, never
/// surfaced to registry callers.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport-level failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The router answered with a non-success status.
    #[error("router responded with status {0}")]
    Status(u16),
}
