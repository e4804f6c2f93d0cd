//! DNS adapter over hickory-resolver.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use tracing::trace;

use super::{Deadline, TxtResolver};
use crate::TransportError;

/// Marker error handed to reqwest when a host name does not exist.
///
/// The HTTP adapter looks for it in the error chain to tell NXDOMAIN apart
/// from other connection failures.
#[derive(Debug, Error)]
#[error("no such host: {0}")]
pub(crate) struct NameNotFound(pub(crate) String);

/// Async DNS resolver used for TXT lookups and, through [`Resolve`], for the
/// HTTP client's address lookups.
#[derive(Clone)]
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
}

impl fmt::Debug for HickoryDns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HickoryDns").finish_non_exhaustive()
    }
}

impl HickoryDns {
    /// Resolver using the default upstream servers.
    pub fn new(timeout: Duration) -> Self {
        Self::with_config(ResolverConfig::default(), timeout)
    }

    /// Resolver using the host's `/etc/resolv.conf` (or platform equivalent).
    pub fn from_system_conf(timeout: Duration) -> Result<Self, TransportError> {
        let (config, _) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| TransportError::Dns(format!("reading system DNS config: {e}")))?;
        Ok(Self::with_config(config, timeout))
    }

    fn with_config(config: ResolverConfig, timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 2;
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl TxtResolver for HickoryDns {
    async fn lookup_txt(
        &self,
        name: &str,
        deadline: &Deadline,
    ) -> Result<Vec<String>, TransportError> {
        let fqdn = if name.ends_with('.') {
            name.to_string()
        } else {
            format!("{name}.")
        };

        let lookup = deadline
            .run(self.resolver.txt_lookup(fqdn))
            .await?
            .map_err(|e| map_resolve_error(name, &e))?;

        let values: Vec<String> = lookup
            .iter()
            .map(|txt| join_segments(txt.txt_data().iter().map(|segment| &segment[..])))
            .collect();
        trace!(name = %name, count = values.len(), "TXT lookup answered");

        if values.is_empty() {
            return Err(TransportError::NotFound(name.to_string()));
        }
        Ok(values)
    }
}

impl Resolve for HickoryDns {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.resolver.clone();
        Box::pin(async move {
            let host = name.as_str().to_string();
            let lookup = resolver.lookup_ip(host.as_str()).await.map_err(
                |err| -> Box<dyn std::error::Error + Send + Sync> {
                    if is_not_found(&err) {
                        Box::new(NameNotFound(host.clone()))
                    } else {
                        Box::new(err)
                    }
                },
            )?;
            let addrs: Vec<SocketAddr> = lookup.iter().map(|ip| SocketAddr::new(ip, 0)).collect();
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok(addrs)
        })
    }
}

fn is_not_found(err: &ResolveError) -> bool {
    matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

fn map_resolve_error(name: &str, err: &ResolveError) -> TransportError {
    if is_not_found(err) {
        TransportError::NotFound(name.to_string())
    } else {
        TransportError::Dns(format!("{name}: {err}"))
    }
}

/// A TXT record may be split into several character-strings; they form one value.
fn join_segments<'a>(segments: impl IntoIterator<Item = &'a [u8]>) -> String {
    let bytes: Vec<u8> = segments.into_iter().flatten().copied().collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
