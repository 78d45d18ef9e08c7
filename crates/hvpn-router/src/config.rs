use clap::Parser;
use hvpn_common::config::{LogArgs, RateLimitArgs, RateLimits, ServeArgs, ServeConfig};
use hvpn_common::endpoint::{parse_service_url, validate_relay_url};
use std::time::Duration;
use url::Url;

/// CLI arguments for the router.
#[derive(Parser, Debug, Clone)]
#[command(name = "hvpn-router")]
#[command(about = "hvpn relay router")]
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
    /// Base URL of the registry to pull membership from.
    #[arg(long, env = "REGISTRY_URL")]
    pub registry_url: Option<String>,
    /// Bearer token accepted on `/update-servers`.
    #[arg(long, env = "ROUTER_TOKEN", hide_env_values = true)]
    pub push_token: Option<String>,
    /// Relay handed out when no location matches.
    #[arg(long, env = "FALLBACK_RELAY")]
    pub fallback_relay: Option<String>,
    /// Seconds a route assignment stays valid.
    #[arg(long, default_value = "3600", env = "HVPN_ROUTE_TTL")]
    pub route_ttl: u64,
    /// Seconds between registry pulls after the first (0 = startup only).
    #[arg(long, default_value = "0", env = "HVPN_RESYNC_INTERVAL")]
    pub resync_interval: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Listener settings.
    pub serve: ServeConfig,
    /// Request limits.
    pub limits: RateLimits,
    /// Registry pull source.
    pub registry_url: Option<Url>,
    /// Bearer accepted on pushes.
    pub push_token: Option<String>,
    /// Fallback relay endpoint.
    pub fallback_relay: Option<String>,
    /// Assignment lifetime.
    pub route_ttl: Duration,
    /// Periodic pull interval; zero disables it.
    pub resync_interval: Duration,
}

impl RouterConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        self.serve.validate()?;
        self.limits.validate()?;

        if self.route_ttl.is_zero() {
            return Err("route_ttl must be greater than 0".to_string());
        }
        if self.route_ttl > Duration::from_secs(7 * 86_400) {
            return Err("route_ttl exceeds reasonable limit (7 days)".to_string());
        }
        if self.resync_interval > Duration::from_secs(86_400) {
            return Err("resync_interval exceeds reasonable limit (86400 seconds)".to_string());
        }
        if !self.resync_interval.is_zero() && self.registry_url.is_none() {
            return Err("resync_interval requires registry_url".to_string());
        }
        if let Some(ref fallback) = self.fallback_relay {
            validate_relay_url(fallback).map_err(|e| format!("fallback_relay: {e}"))?;
        }
        Ok(())
    }
}

impl TryFrom<Args> for RouterConfig {
    type Error = String;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let registry_url = args
            .registry_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|raw| parse_service_url("registry_url", raw))
            .transpose()?;
        Ok(Self {
            serve: ServeConfig::try_from(args.serve)?,
            limits: args.rate.into(),
            registry_url,
            push_token: args.push_token.filter(|t| !t.is_empty()),
            fallback_relay: args
                .fallback_relay
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            route_ttl: Duration::from_secs(args.route_ttl),
            resync_interval: Duration::from_secs(args.resync_interval),
        })
    }
}
