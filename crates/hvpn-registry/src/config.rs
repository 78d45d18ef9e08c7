use crate::store::IdPolicy;
use clap::Parser;
use hvpn_common::config::{LogArgs, RateLimitArgs, RateLimits, ServeArgs, ServeConfig};
use hvpn_common::endpoint::parse_service_url;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// CLI arguments for the registry.
#[derive(Parser, Debug, Clone)]
#[command(name = "hvpn-registry")]
#[command(about = "hvpn relay registry")]
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
    /// Directory of the durable membership store.
    #[arg(long, default_value = "hvpn-registry.db", env = "HVPN_DATA_DIR")]
    pub data_dir: PathBuf,
    /// Base URL of the router that receives membership pushes.
    #[arg(long, env = "ROUTER_URL")]
    pub router_url: Option<String>,
    /// Bearer token presented when pushing to the router.
    #[arg(long, env = "ROUTER_TOKEN", hide_env_values = true)]
    pub router_token: Option<String>,
    /// Bearer token relays must present on `/register`.
    #[arg(long, env = "REGISTER_TOKEN", hide_env_values = true)]
    pub register_token: Option<String>,
    /// Seconds between health sweeps.
    #[arg(long, default_value = "300", env = "HVPN_SWEEP_INTERVAL")]
    pub sweep_interval: u64,
    /// Seconds allowed for one health probe.
    #[arg(long, default_value = "5", env = "HVPN_PROBE_TIMEOUT")]
    pub probe_timeout: u64,
    /// Mint ids for short requests and refuse cross-owner id reuse.
    #[arg(long, env = "HVPN_SECURE_IDS")]
    pub secure_ids: bool,
    /// Shortest id accepted as-is when secure ids are on.
    #[arg(long, default_value = "16", env = "HVPN_MIN_ID_LEN")]
    pub min_id_len: usize,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Listener settings.
    pub serve: ServeConfig,
    /// Request limits.
    pub limits: RateLimits,
    /// Durable store location.
    pub data_dir: PathBuf,
    /// Router push target.
    pub router_url: Option<Url>,
    /// Bearer for router pushes.
    pub router_token: Option<String>,
    /// Bearer required on `/register`.
    pub register_token: Option<String>,
    /// Interval between sweeps.
    pub sweep_interval: Duration,
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Id assignment policy.
    pub id_policy: IdPolicy,
}

impl RegistryConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        self.serve.validate()?;
        self.limits.validate()?;

        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be greater than 0".to_string());
        }
        if self.sweep_interval > Duration::from_secs(86_400) {
            return Err("sweep_interval exceeds reasonable limit (86400 seconds)".to_string());
        }

        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be greater than 0".to_string());
        }
        if self.probe_timeout >= self.sweep_interval {
            return Err("probe_timeout must be shorter than sweep_interval".to_string());
        }

        if self.id_policy.min_id_len == 0 || self.id_policy.min_id_len > 128 {
            return Err("min_id_len must be between 1 and 128".to_string());
        }

        if self.router_url.is_some() && self.router_token.is_none() {
            return Err("router_url requires router_token".to_string());
        }
        if matches!(self.register_token.as_deref(), Some("")) {
            return Err("register_token must not be empty".to_string());
        }
        Ok(())
    }
}

impl TryFrom<Args> for RegistryConfig {
    type Error = String;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let router_url = args
            .router_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|raw| parse_service_url("router_url", raw))
            .transpose()?;
        Ok(Self {
            serve: ServeConfig::try_from(args.serve)?,
            limits: args.rate.into(),
            data_dir: args.data_dir,
            router_url,
            router_token: args.router_token.filter(|t| !t.is_empty()),
            register_token: args.register_token,
            sweep_interval: Duration::from_secs(args.sweep_interval),
            probe_timeout: Duration::from_secs(args.probe_timeout),
            id_policy: IdPolicy {
                secure_ids: args.secure_ids,
                min_id_len: args.min_id_len,
            },
        })
    }
}
