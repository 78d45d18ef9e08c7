use crate::ratelimit::{RateLimit, MAX_BUCKET_ENTRIES};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Listener options shared by every service.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "HVPN_LISTEN")]
    pub listen: SocketAddr,
    /// Terminate TLS on the listener.
    #[arg(long, env = "USE_TLS")]
    pub tls: bool,
    /// PEM certificate chain used when TLS is enabled.
    #[arg(long, env = "TLS_CERT_FILE")]
    pub tls_cert: Option<PathBuf>,
    /// PEM private key used when TLS is enabled.
    #[arg(long, env = "TLS_KEY_FILE")]
    pub tls_key: Option<PathBuf>,
    /// Optional socket address for the Prometheus endpoint.
    #[arg(long, env = "HVPN_METRICS")]
    pub metrics_addr: Option<SocketAddr>,
    /// Seconds allowed to receive request headers (also bounds idle keep-alive).
    #[arg(long, default_value = "15", env = "HVPN_HEADER_TIMEOUT")]
    pub header_timeout: u64,
    /// Seconds allowed for the TLS handshake.
    #[arg(long, default_value = "15", env = "HVPN_TLS_HANDSHAKE_TIMEOUT")]
    pub tls_handshake_timeout: u64,
    /// Maximum concurrent connections on the listener.
    #[arg(long, default_value = "10000", env = "HVPN_MAX_CONNS")]
    pub max_conns: usize,
}

/// Certificate and key locations for a TLS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

/// Runtime listener configuration derived from [`ServeArgs`].
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// TLS material, when TLS is enabled.
    pub tls: Option<TlsPaths>,
    /// Optional Prometheus endpoint.
    pub metrics_addr: Option<SocketAddr>,
    /// Header read timeout.
    pub header_timeout: Duration,
    /// TLS handshake timeout.
    pub tls_handshake_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_conns: usize,
}

impl ServeConfig {
    /// Plain listener with default timeouts, mostly useful in tests.
    #[must_use]
    pub fn plain(listen: SocketAddr) -> Self {
        Self {
            listen,
            tls: None,
            metrics_addr: None,
            header_timeout: Duration::from_secs(15),
            tls_handshake_timeout: Duration::from_secs(15),
            max_conns: 10_000,
        }
    }

    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }
        if self.header_timeout.is_zero() || self.header_timeout > Duration::from_secs(300) {
            return Err("header_timeout must be between 1 and 300 seconds".to_string());
        }
        if self.tls_handshake_timeout.is_zero()
            || self.tls_handshake_timeout > Duration::from_secs(300)
        {
            return Err("tls_handshake_timeout must be between 1 and 300 seconds".to_string());
        }
        Ok(())
    }
}

impl TryFrom<ServeArgs> for ServeConfig {
    type Error = String;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let tls = if args.tls {
            match (args.tls_cert, args.tls_key) {
                (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
                _ => return Err("tls requires both tls_cert and tls_key".to_string()),
            }
        } else {
            None
        };
        Ok(Self {
            listen: args.listen,
            tls,
            metrics_addr: args.metrics_addr,
            header_timeout: Duration::from_secs(args.header_timeout),
            tls_handshake_timeout: Duration::from_secs(args.tls_handshake_timeout),
            max_conns: args.max_conns,
        })
    }
}

/// Request rate limits, as `(window, max-requests)` pairs.
#[derive(Args, Debug, Clone)]
pub struct RateLimitArgs {
    /// Window in seconds for general endpoints.
    #[arg(long, default_value = "60", env = "HVPN_RATE_WINDOW")]
    pub rate_window: u64,
    /// Requests allowed per window on general endpoints.
    #[arg(long, default_value = "120", env = "HVPN_RATE_MAX")]
    pub rate_max: u32,
    /// Window in seconds for sensitive endpoints.
    #[arg(long, default_value = "60", env = "HVPN_SENSITIVE_RATE_WINDOW")]
    pub sensitive_rate_window: u64,
    /// Requests allowed per window on sensitive endpoints.
    #[arg(long, default_value = "10", env = "HVPN_SENSITIVE_RATE_MAX")]
    pub sensitive_rate_max: u32,
}

/// Runtime rate limits derived from [`RateLimitArgs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Limit for read-mostly endpoints.
    pub general: RateLimit,
    /// Limit for mutating endpoints.
    pub sensitive: RateLimit,
}

impl RateLimits {
    /// Validates both tiers.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        for (name, limit) in [("rate", self.general), ("sensitive_rate", self.sensitive)] {
            if limit.window.is_zero() {
                return Err(format!("{name}_window must be greater than 0"));
            }
            if limit.window > Duration::from_secs(86_400) {
                return Err(format!("{name}_window exceeds reasonable limit (86400 seconds)"));
            }
            if limit.max_requests == 0 {
                return Err(format!("{name}_max must be greater than 0"));
            }
            if limit.max_requests as usize > MAX_BUCKET_ENTRIES {
                return Err(format!(
                    "{name}_max exceeds reasonable limit ({MAX_BUCKET_ENTRIES})"
                ));
            }
        }
        Ok(())
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            general: RateLimit::new(Duration::from_secs(60), 120),
            sensitive: RateLimit::new(Duration::from_secs(60), 10),
        }
    }
}

impl From<RateLimitArgs> for RateLimits {
    fn from(args: RateLimitArgs) -> Self {
        Self {
            general: RateLimit::new(Duration::from_secs(args.rate_window), args.rate_max),
            sensitive: RateLimit::new(
                Duration::from_secs(args.sensitive_rate_window),
                args.sensitive_rate_max,
            ),
        }
    }
}

/// Logging options.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Write logs to a file instead of stderr.
    #[arg(long, env = "HVPN_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}
