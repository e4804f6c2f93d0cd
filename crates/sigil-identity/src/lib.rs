//! Handle and DID resolution with bidirectional verification.
//!
//! A handle (`alice.example.com`) claims a DID through DNS or an HTTPS
//! well-known file. The DID's document in turn declares the handle. Neither
//! claim is trusted alone: an identity is only verified when both agree.
//!
//! ## Layers
//!
//! - **Transport**: DNS TXT lookups and bounded HTTPS GETs, each under a caller [`Deadline`]
//! - **Handle resolver**: handle → claimed DID, DNS first with HTTPS fallback
//! - **DID resolver**: DID → document for `did:plc` and `did:web`
//! - **Verifier**: checks both directions and builds [`IdentityRecord`]s
//! - **Cache**: TTL + LRU with request coalescing, wrapping any [`Resolver`]
//!
//! ```no_run
//! use std::sync::Arc;
//! use sigil_identity::{Deadline, ResolutionCache, Resolver, ResolverConfig, Verifier, Handle};
//!
//! # async fn run() -> Result<(), sigil_identity::IdentityError> {
//! let config = ResolverConfig::default();
//! let verifier = Verifier::from_config(&config)?;
//! let cache = ResolutionCache::new(Arc::new(verifier), config.cache.clone());
//!
//! let handle = Handle::parse("alice.example.com")?;
//! let record = cache.resolve_handle(&handle, &Deadline::none()).await?;
//! println!("{} is {}", record.display_handle(), record.did);
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod config;
pub mod did;
mod document;
mod error;
pub mod handle;
pub mod report;
mod syntax;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
mod types;
pub mod verifier;

pub use cache::ResolutionCache;
pub use config::{
    CacheConfig, ConfigError, DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_MAX_WELL_KNOWN_BYTES,
    DEFAULT_PLC_URL, DEFAULT_USER_AGENT, FallbackMode, ResolverConfig,
};
pub use did::DidResolver;
pub use document::{DidDocument, Service, VerificationMethod};
pub use error::{ErrorKind, IdentityError, TransportError};
pub use handle::{HandleResolver, rank_errors};
pub use report::{CountingReporter, Event, NoopReporter, Reporter, ResolverStats, TracingReporter};
pub use syntax::{AtIdentifier, Did, DidMethod, Handle, INVALID_HANDLE};
pub use transport::{Deadline, HickoryDns, HttpFetcher, ReqwestFetcher, TxtResolver};
pub use types::{DidMode, IdentityRecord, VerificationStatus};
pub use verifier::{Resolver, Verifier};
