//! Resolver settings from flags and environment.

use std::time::Duration;

use clap::Args;
use sigil_identity::{
    CacheConfig, ConfigError, DEFAULT_PLC_URL, DEFAULT_USER_AGENT, FallbackMode, ResolverConfig,
};

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
pub fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Args, Debug, Clone)]
pub struct ResolverArgs {
    /// PLC directory base URL
    #[arg(long, global = true, env = "SIGIL_PLC_URL", default_value = DEFAULT_PLC_URL)]
    pub plc_url: String,

    /// User-Agent sent with HTTP requests
    #[arg(long, global = true, env = "SIGIL_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Per-request HTTP timeout in seconds
    #[arg(long, global = true, env = "SIGIL_HTTP_TIMEOUT_SECS", default_value = "10")]
    pub http_timeout_secs: u64,

    /// Per-query DNS timeout in seconds
    #[arg(long, global = true, env = "SIGIL_DNS_TIMEOUT_SECS", default_value = "3")]
    pub dns_timeout_secs: u64,

    /// Maximum number of cached resolutions
    #[arg(long, global = true, env = "SIGIL_CACHE_CAPACITY", default_value = "10000")]
    pub cache_capacity: usize,

    /// Lifetime of verified answers in seconds
    #[arg(long, global = true, env = "SIGIL_VERIFIED_TTL_SECS", default_value = "3600")]
    pub verified_ttl_secs: u64,

    /// Lifetime of not-found and mismatch answers in seconds
    #[arg(long, global = true, env = "SIGIL_NEGATIVE_TTL_SECS", default_value = "300")]
    pub negative_ttl_secs: u64,

    /// Query DNS and the well-known endpoint at the same time.
    /// Accepts "1", "true", "yes", or "on".
    #[arg(long, global = true, env = "SIGIL_PARALLEL_FALLBACK", action = clap::ArgAction::Set, value_parser = parse_bool_env, default_value = "false")]
    pub parallel_fallback: bool,
}

impl ResolverArgs {
    pub fn to_config(&self) -> Result<ResolverConfig, ConfigError> {
        let fallback = if self.parallel_fallback {
            FallbackMode::Parallel
        } else {
            FallbackMode::Sequential
        };
        let cache = CacheConfig::default()
            .with_capacity(self.cache_capacity)
            .with_ttls(
                Duration::from_secs(self.verified_ttl_secs),
                Duration::from_secs(self.negative_ttl_secs),
            );

        let config = ResolverConfig::default()
            .with_plc_url(&self.plc_url)?
            .with_user_agent(self.user_agent.as_str())
            .with_timeouts(
                Duration::from_secs(self.http_timeout_secs),
                Duration::from_secs(self.dns_timeout_secs),
            )
            .with_fallback(fallback)
            .with_cache(cache);
        config.validate()?;
        Ok(config)
    }
}
