//! Resolver configuration.
//!
//! Values are injected by the embedding process; nothing here reads the
//! environment.

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Public PLC directory.
pub const DEFAULT_PLC_URL: &str = "https://plc.directory";

/// Ceiling for `/.well-known/atproto-did` bodies.
pub const DEFAULT_MAX_WELL_KNOWN_BYTES: usize = 2048;

/// Ceiling for DID document bodies.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 64 * 1024;

pub const DEFAULT_USER_AGENT: &str = concat!("sigil/", env!("CARGO_PKG_VERSION"));

// Validation bounds
const MIN_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_BODY_LIMIT: usize = 16 * 1024 * 1024;
const MAX_CACHE_CAPACITY: usize = 10_000_000;

/// Configuration is rejected before any resolver is built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid PLC directory URL: {0}")]
    PlcUrl(String),

    #[error("{name} must be between {min:?} and {max:?}, got {value:?}")]
    Timeout {
        name: &'static str,
        value: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("{name} must be between 1 and {max}, got {value}")]
    Limit {
        name: &'static str,
        value: usize,
        max: usize,
    },

    #[error("negative TTL ({negative:?}) must not exceed verified TTL ({verified:?})")]
    TtlOrder {
        negative: Duration,
        verified: Duration,
    },
}

/// How the handle resolver combines its DNS and HTTPS lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackMode {
    /// DNS first, HTTPS only if DNS had no answer.
    #[default]
    Sequential,
    /// Both lookups at once; the same ranking decides the result.
    Parallel,
}

/// Settings for the resolvers and transports.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base URL of the PLC directory, without trailing slash.
    pub plc_url: Url,
    pub user_agent: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Per-query DNS timeout.
    pub dns_timeout: Duration,
    pub max_well_known_bytes: usize,
    pub max_document_bytes: usize,
    pub fallback: FallbackMode,
    pub cache: CacheConfig,
}

/// Settings for [`crate::ResolutionCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries before least-recently-used eviction.
    pub capacity: usize,
    /// Lifetime of verified and unverified-claim answers.
    pub verified_ttl: Duration,
    /// Lifetime of not-found and mismatch answers.
    pub negative_ttl: Duration,
    /// Deadline for one shared in-flight resolution.
    pub resolve_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            verified_ttl: Duration::from_secs(60 * 60),
            negative_ttl: Duration::from_secs(5 * 60),
            resolve_timeout: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ttls(mut self, verified_ttl: Duration, negative_ttl: Duration) -> Self {
        self.verified_ttl = verified_ttl;
        self.negative_ttl = negative_ttl;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_limit("cache capacity", self.capacity, MAX_CACHE_CAPACITY)?;
        check_timeout("resolve timeout", self.resolve_timeout)?;
        if self.negative_ttl > self.verified_ttl {
            return Err(ConfigError::TtlOrder {
                negative: self.negative_ttl,
                verified: self.verified_ttl,
            });
        }
        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            plc_url: Url::parse(DEFAULT_PLC_URL).expect("default PLC URL is valid"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: Duration::from_secs(10),
            dns_timeout: Duration::from_secs(3),
            max_well_known_bytes: DEFAULT_MAX_WELL_KNOWN_BYTES,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            fallback: FallbackMode::Sequential,
            cache: CacheConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Set the PLC directory base URL.
    pub fn with_plc_url(mut self, plc_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(plc_url).map_err(|e| ConfigError::PlcUrl(format!("{plc_url}: {e}")))?;
        self.plc_url = url;
        Ok(self)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeouts(mut self, http_timeout: Duration, dns_timeout: Duration) -> Self {
        self.http_timeout = http_timeout;
        self.dns_timeout = dns_timeout;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackMode) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Check every setting against its bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.plc_url.scheme(), "http" | "https") || self.plc_url.cannot_be_a_base() {
            return Err(ConfigError::PlcUrl(self.plc_url.to_string()));
        }
        check_timeout("HTTP timeout", self.http_timeout)?;
        check_timeout("DNS timeout", self.dns_timeout)?;
        check_limit(
            "well-known body limit",
            self.max_well_known_bytes,
            MAX_BODY_LIMIT,
        )?;
        check_limit("document body limit", self.max_document_bytes, MAX_BODY_LIMIT)?;
        self.cache.validate()
    }

    /// URL of a `did:plc` document on the configured directory.
    pub(crate) fn plc_document_url(&self, did: &str) -> String {
        format!("{}/{}", self.plc_url.as_str().trim_end_matches('/'), did)
    }
}

fn check_timeout(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value < MIN_TIMEOUT || value > MAX_TIMEOUT {
        return Err(ConfigError::Timeout {
            name,
            value,
            min: MIN_TIMEOUT,
            max: MAX_TIMEOUT,
        });
    }
    Ok(())
}

fn check_limit(name: &'static str, value: usize, max: usize) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::Limit { name, value, max });
    }
    Ok(())
}
