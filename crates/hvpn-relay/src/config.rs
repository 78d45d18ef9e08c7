use crate::egress::Egress;
use crate::handshake::OriginPolicy;
use clap::Parser;
use hvpn_common::config::{LogArgs, RateLimitArgs, RateLimits, ServeArgs, ServeConfig};
use hvpn_common::endpoint::{parse_service_url, validate_relay_url};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// CLI arguments for a relay node.
#[derive(Parser, Debug, Clone)]
#[command(name = "hvpn-relay")]
#[command(about = "hvpn tunnel relay")]
#[command(version)]
pub struct Args {
    /// Listener options.
    #[command(flatten)]
    pub serve: ServeArgs,
    /// Request limits.
    #[command(flatten)]
    pub rate: RateLimitArgs,
    /// Logging options.
    #[command(flatten)]
    pub log: LogArgs,
    /// Extra trusted origins, comma separated. `*` trusts every origin.
    #[arg(long, env = "TRUSTED_DOMAINS", value_delimiter = ',')]
    pub trusted_origins: Vec<String>,
    /// Egress for every session: `echo`, `ws(s)://next-hop/ws` or `tcp://host:port`.
    #[arg(long, default_value = "echo", env = "HVPN_EGRESS")]
    pub egress: String,
    /// Base URL of the registry to register with.
    #[arg(long, env = "REGISTRY_URL")]
    pub registry_url: Option<String>,
    /// Relay id (default `<hostname>-<unix time>`).
    #[arg(long, env = "HVPN_RELAY_ID")]
    pub relay_id: Option<String>,
    /// Location label advertised to the registry.
    #[arg(long, default_value = "unknown", env = "HVPN_LOCATION")]
    pub location: String,
    /// Tunnel endpoint advertised to the registry.
    #[arg(long, env = "HVPN_PUBLIC_URL")]
    pub public_url: Option<String>,
    /// Local tunnel agent API used to discover the public endpoint.
    #[arg(long, env = "CLOUDFLARED_API")]
    pub cloudflared_api: Option<String>,
    /// Bearer token presented on `/register`.
    #[arg(long, env = "REGISTER_TOKEN", hide_env_values = true)]
    pub register_token: Option<String>,
    /// Seconds between re-registrations (0 = register once).
    #[arg(long, default_value = "600", env = "HVPN_REREGISTER_INTERVAL")]
    pub reregister_interval: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listener settings.
    pub serve: ServeConfig,
    /// Upgrade limits.
    pub limits: RateLimits,
    /// Trusted origins.
    pub origins: OriginPolicy,
    /// Egress for every session.
    pub egress: Egress,
    /// Registry to register with.
    pub registry_url: Option<Url>,
    /// Relay id.
    pub relay_id: String,
    /// Location label.
    pub location: String,
    /// Advertised endpoint; derived from the listener when unset.
    pub public_url: Option<String>,
    /// Tunnel agent API.
    pub cloudflared_api: Option<Url>,
    /// Bearer presented on `/register`.
    pub register_token: Option<String>,
    /// Interval between re-registrations.
    pub reregister_interval: Duration,
}

impl RelayConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        self.serve.validate()?;
        self.limits.validate()?;

        if self.relay_id.trim().is_empty() {
            return Err("relay_id must not be empty".to_string());
        }
        if self.location.trim().is_empty() {
            return Err("location must not be empty".to_string());
        }
        if let Some(ref url) = self.public_url {
            validate_relay_url(url).map_err(|e| format!("public_url: {e}"))?;
        }
        if self.reregister_interval > Duration::from_secs(86_400) {
            return Err("reregister_interval exceeds reasonable limit (86400 seconds)".to_string());
        }
        Ok(())
    }

    /// Endpoint to advertise when neither a public URL nor a tunnel agent
    /// is configured.
    #[must_use]
    pub fn local_endpoint(&self, port: u16) -> String {
        let scheme = if self.serve.tls.is_some() { "wss" } else { "ws" };
        format!(
            "{scheme}://localhost:{port}{}",
            hvpn_common::types::TUNNEL_PATH
        )
    }
}

/// `<hostname>-<unix seconds>`.
#[must_use]
pub fn default_relay_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string());
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{host}-{now}")
}

fn optional_url(name: &str, raw: Option<String>) -> Result<Option<Url>, String> {
    raw.as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_service_url(name, s))
        .transpose()
}

impl TryFrom<Args> for RelayConfig {
    type Error = String;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let egress: Egress = args.egress.parse().map_err(|e| format!("egress: {e}"))?;
        Ok(Self {
            serve: ServeConfig::try_from(args.serve)?,
            limits: args.rate.into(),
            origins: OriginPolicy::with_trusted(&args.trusted_origins),
            egress,
            registry_url: optional_url("registry_url", args.registry_url)?,
            relay_id: args
                .relay_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(default_relay_id),
            location: args.location,
            public_url: args.public_url.filter(|u| !u.trim().is_empty()),
            cloudflared_api: optional_url("cloudflared_api", args.cloudflared_api)?,
            register_token: args.register_token.filter(|t| !t.is_empty()),
            reregister_interval: Duration::from_secs(args.reregister_interval),
        })
    }
}
