//! DID → document resolution for `did:plc` and `did:web`.

use std::sync::Arc;

use tracing::debug;

use crate::report::{Event, LookupMethod, NoopReporter, Reporter};
use crate::transport::{Deadline, HttpFetcher};
use crate::{Did, DidDocument, DidMethod, IdentityError, ResolverConfig, TransportError};

/// Fetches DID documents from their authoritative source.
#[derive(Clone)]
pub struct DidResolver {
    http: Arc<dyn HttpFetcher>,
    config: ResolverConfig,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for DidResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DidResolver")
            .field("plc_url", &self.config.plc_url.as_str())
            .field("max_document_bytes", &self.config.max_document_bytes)
            .finish_non_exhaustive()
    }
}

impl DidResolver {
    /// Resolver against the public PLC directory with default limits.
    pub fn new(http: Arc<dyn HttpFetcher>) -> Self {
        Self::from_config(&ResolverConfig::default(), http)
    }

    pub fn from_config(config: &ResolverConfig, http: Arc<dyn HttpFetcher>) -> Self {
        Self {
            http,
            config: config.clone(),
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Where the document for `did` lives.
    ///
    /// Fails without touching the network for unsupported methods and for
    /// `did:web` identifiers that do not name a bare host.
    pub fn document_url(&self, did: &Did) -> Result<String, IdentityError> {
        match did.supported_method()? {
            DidMethod::Plc => Ok(self.config.plc_document_url(did.as_str())),
            DidMethod::Web => did_web_url(did),
        }
    }

    /// Fetch and parse the current document for `did`.
    pub async fn resolve(
        &self,
        did: &Did,
        deadline: &Deadline,
    ) -> Result<DidDocument, IdentityError> {
        let method = did.supported_method()?;
        let url = self.document_url(did)?;

        self.reporter.report(Event::LookupAttempted(match method {
            DidMethod::Plc => LookupMethod::PlcDirectory,
            DidMethod::Web => LookupMethod::DidWeb,
        }));

        let body = self
            .http
            .fetch(&url, self.config.max_document_bytes, deadline)
            .await
            .map_err(|e| match e {
                TransportError::NotFound(_)
                | TransportError::Status {
                    status: 404 | 410, ..
                } => IdentityError::DidNotFound { did: did.clone() },
                other => {
                    debug!(url = %url, error = %other, "document fetch failed");
                    other.into()
                }
            })?;

        let document = DidDocument::from_slice(&body, did)?;
        debug!(
            did = %did,
            aliases = document.also_known_as.len(),
            "resolved DID document"
        );
        Ok(document)
    }
}

/// `https://<domain>/.well-known/did.json` for a host-only `did:web`.
///
/// A percent-encoded colon (`%3A`) separates an optional port. Further `:`
/// segments would denote a path, which is not supported.
pub fn did_web_url(did: &Did) -> Result<String, IdentityError> {
    let identifier = did.identifier();
    if identifier.contains(':') {
        return Err(IdentityError::InvalidSyntax(format!(
            "path-based did:web is not supported: {did}"
        )));
    }

    let (domain, port) = match identifier
        .split_once("%3A")
        .or_else(|| identifier.split_once("%3a"))
    {
        Some((domain, port)) => (domain, Some(port)),
        None => (identifier, None),
    };

    let valid_domain = !domain.is_empty()
        && domain.contains('.')
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid_domain {
        return Err(IdentityError::InvalidSyntax(format!(
            "invalid did:web domain: {did}"
        )));
    }

    match port {
        None => Ok(format!("https://{domain}/.well-known/did.json")),
        Some(port) => {
            let port: u16 = port.parse().map_err(|_| {
                IdentityError::InvalidSyntax(format!("invalid did:web port: {did}"))
            })?;
            Ok(format!("https://{domain}:{port}/.well-known/did.json"))
        }
    }
}
