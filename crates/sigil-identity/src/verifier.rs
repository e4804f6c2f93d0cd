//! Bidirectional verification.
//!
//! A handle only counts when its claimed DID's document declares the handle
//! back, and a document's declared handle only counts when it resolves to the
//! same DID. The verifier keeps no state between calls.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::did::DidResolver;
use crate::handle::HandleResolver;
use crate::report::{Event, NoopReporter, Reporter};
use crate::transport::{Deadline, HickoryDns, ReqwestFetcher};
use crate::{
    AtIdentifier, Did, DidMode, Handle, IdentityError, IdentityRecord, ResolverConfig,
    VerificationStatus,
};

/// Something that turns identifiers into identity records.
///
/// Implemented by [`Verifier`] and by [`crate::ResolutionCache`], which wraps
/// any other implementation.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve a handle and verify its DID declares it back.
    async fn resolve_handle(
        &self,
        handle: &Handle,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError>;

    /// Fetch a DID's document and, in [`DidMode::Bidirectional`], verify its
    /// declared handle.
    async fn resolve_did(
        &self,
        did: &Did,
        mode: DidMode,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError>;

    /// Dispatch on the kind of identifier.
    async fn resolve_identifier(
        &self,
        identifier: &AtIdentifier,
        mode: DidMode,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError> {
        match identifier {
            AtIdentifier::Handle(handle) => self.resolve_handle(handle, deadline).await,
            AtIdentifier::Did(did) => self.resolve_did(did, mode, deadline).await,
        }
    }
}

/// Combines the handle and DID resolvers into verified records.
#[derive(Clone)]
pub struct Verifier {
    handles: HandleResolver,
    dids: DidResolver,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("handles", &self.handles)
            .field("dids", &self.dids)
            .finish_non_exhaustive()
    }
}

impl Verifier {
    pub fn new(handles: HandleResolver, dids: DidResolver) -> Self {
        Self {
            handles,
            dids,
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Production wiring: hickory DNS and a reqwest client that resolves hosts
    /// through it.
    pub fn from_config(config: &ResolverConfig) -> Result<Self, IdentityError> {
        let dns = HickoryDns::from_system_conf(config.dns_timeout)
            .unwrap_or_else(|_| HickoryDns::new(config.dns_timeout));
        let http = Arc::new(ReqwestFetcher::with_dns(config, dns.clone())?);
        let handles = HandleResolver::from_config(config, Arc::new(dns), http.clone());
        let dids = DidResolver::from_config(config, http);
        Ok(Self::new(handles, dids))
    }

    /// Report through `reporter`, here and in both inner resolvers.
    pub fn with_reporter(self, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            handles: self.handles.with_reporter(reporter.clone()),
            dids: self.dids.with_reporter(reporter.clone()),
            reporter,
        }
    }

    pub fn handle_resolver(&self) -> &HandleResolver {
        &self.handles
    }

    pub fn did_resolver(&self) -> &DidResolver {
        &self.dids
    }
}

#[async_trait]
impl Resolver for Verifier {
    async fn resolve_handle(
        &self,
        handle: &Handle,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError> {
        let did = self.handles.resolve(handle, deadline).await?;
        let document = match self.dids.resolve(&did, deadline).await {
            Ok(document) => document,
            Err(e @ IdentityError::DidNotFound { .. }) => return Err(e),
            Err(e) => {
                debug!(handle = %handle, did = %did, error = %e, "document fetch failed");
                return Err(IdentityError::DocumentUnavailable {
                    handle: handle.clone(),
                    did,
                    source: Box::new(e),
                });
            }
        };

        if !document.declares_handle(handle) {
            self.reporter.report(Event::Mismatch);
            info!(handle = %handle, did = %did, "document does not declare handle");
            return Err(IdentityError::Mismatch {
                handle: handle.clone(),
                did,
                declared: document.also_known_as.clone(),
            });
        }

        debug!(handle = %handle, did = %did, "handle verified");
        Ok(IdentityRecord::new(did, Arc::new(document), VerificationStatus::Verified)
            .with_handle(handle.clone()))
    }

    async fn resolve_did(
        &self,
        did: &Did,
        mode: DidMode,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError> {
        let document = Arc::new(self.dids.resolve(did, deadline).await?);
        let declared = document.handles();

        if mode == DidMode::DocumentOnly {
            return Ok(
                IdentityRecord::new(did.clone(), document, VerificationStatus::UnverifiedClaim)
                    .with_claimed_handle(declared.into_iter().next()),
            );
        }

        let claimed = match declared.as_slice() {
            [] => {
                debug!(did = %did, "document declares no handle");
                return Ok(IdentityRecord::new(
                    did.clone(),
                    document,
                    VerificationStatus::NotFound,
                ));
            }
            [only] => only.clone(),
            [first, ..] => {
                debug!(did = %did, count = declared.len(), "document declares several handles");
                return Ok(IdentityRecord::new(
                    did.clone(),
                    document,
                    VerificationStatus::UnverifiedClaim,
                )
                .with_claimed_handle(Some(first.clone())));
            }
        };

        match self.handles.resolve(&claimed, deadline).await {
            Ok(resolved) if &resolved == did => {
                debug!(did = %did, handle = %claimed, "DID verified");
                Ok(
                    IdentityRecord::new(did.clone(), document, VerificationStatus::Verified)
                        .with_handle(claimed),
                )
            }
            Ok(resolved) => {
                self.reporter.report(Event::Mismatch);
                info!(did = %did, handle = %claimed, resolved = %resolved, "declared handle points elsewhere");
                Ok(
                    IdentityRecord::new(did.clone(), document, VerificationStatus::Mismatch)
                        .with_claimed_handle(Some(claimed)),
                )
            }
            Err(e) if e.is_handle_not_found() => Ok(IdentityRecord::new(
                did.clone(),
                document,
                VerificationStatus::NotFound,
            )
            .with_claimed_handle(Some(claimed))),
            Err(e) => Err(e),
        }
    }
}
