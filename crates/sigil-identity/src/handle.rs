//! Handle → DID resolution.
//!
//! A handle claims a DID through a DNS TXT record at `_atproto.<handle>` or,
//! failing that, through `https://<handle>/.well-known/atproto-did`. Neither
//! source is trusted on its own: the verifier still has to check that the
//! DID's document declares the handle back.

use std::sync::Arc;

use tracing::debug;

use crate::report::{Event, LookupMethod, NoopReporter, Reporter};
use crate::transport::{Deadline, HttpFetcher, TxtResolver};
use crate::{
    DEFAULT_MAX_WELL_KNOWN_BYTES, Did, FallbackMode, Handle, IdentityError, ResolverConfig,
    TransportError,
};

/// Prefix of the TXT value carrying the DID.
const TXT_DID_PREFIX: &str = "did=";

/// DNS label under which the TXT record lives.
const TXT_LABEL: &str = "_atproto";

/// Resolves handles to the DID they claim.
#[derive(Clone)]
pub struct HandleResolver {
    dns: Arc<dyn TxtResolver>,
    http: Arc<dyn HttpFetcher>,
    fallback: FallbackMode,
    max_well_known_bytes: usize,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for HandleResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleResolver")
            .field("fallback", &self.fallback)
            .field("max_well_known_bytes", &self.max_well_known_bytes)
            .finish_non_exhaustive()
    }
}

impl HandleResolver {
    pub fn new(dns: Arc<dyn TxtResolver>, http: Arc<dyn HttpFetcher>) -> Self {
        Self {
            dns,
            http,
            fallback: FallbackMode::Sequential,
            max_well_known_bytes: DEFAULT_MAX_WELL_KNOWN_BYTES,
            reporter: Arc::new(NoopReporter),
        }
    }

    pub fn from_config(
        config: &ResolverConfig,
        dns: Arc<dyn TxtResolver>,
        http: Arc<dyn HttpFetcher>,
    ) -> Self {
        Self {
            fallback: config.fallback,
            max_well_known_bytes: config.max_well_known_bytes,
            ..Self::new(dns, http)
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackMode) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// The DID `handle` claims.
    ///
    /// DNS is asked first. The well-known endpoint is only consulted when DNS
    /// has no claim (or concurrently, in [`FallbackMode::Parallel`]). When both
    /// fail, [`rank_errors`] picks the error to report.
    pub async fn resolve(&self, handle: &Handle, deadline: &Deadline) -> Result<Did, IdentityError> {
        if handle.has_reserved_tld() {
            debug!(handle = %handle, "reserved TLD, not resolving");
            return Err(not_found(handle));
        }

        match self.fallback {
            FallbackMode::Sequential => {
                let dns_err = match self.resolve_dns(handle, deadline).await {
                    Ok(did) => return Ok(did),
                    Err(e) if e.is_handle_not_found() => e,
                    // Whatever HTTPS says, this error would win the ranking.
                    Err(e) => return Err(e),
                };
                let http_err = match self.resolve_well_known(handle, deadline).await {
                    Ok(did) => return Ok(did),
                    Err(e) => e,
                };
                Err(rank_errors(dns_err, http_err))
            }
            FallbackMode::Parallel => {
                let (dns, http) = tokio::join!(
                    self.resolve_dns(handle, deadline),
                    self.resolve_well_known(handle, deadline)
                );
                match (dns, http) {
                    (Ok(did), _) => Ok(did),
                    (Err(dns_err), _) if !dns_err.is_handle_not_found() => Err(dns_err),
                    (Err(_), Ok(did)) => Ok(did),
                    (Err(dns_err), Err(http_err)) => Err(rank_errors(dns_err, http_err)),
                }
            }
        }
    }

    /// The DID published in the handle's `_atproto` TXT record.
    pub async fn resolve_dns(
        &self,
        handle: &Handle,
        deadline: &Deadline,
    ) -> Result<Did, IdentityError> {
        self.reporter
            .report(Event::LookupAttempted(LookupMethod::DnsTxt));
        let name = format!("{TXT_LABEL}.{handle}");

        let values = match self.dns.lookup_txt(&name, deadline).await {
            Ok(values) => values,
            Err(TransportError::NotFound(_)) => return Err(not_found(handle)),
            Err(e) => {
                debug!(name = %name, error = %e, "TXT lookup failed");
                return Err(e.into());
            }
        };

        let Some(value) = values.iter().find_map(|v| v.strip_prefix(TXT_DID_PREFIX)) else {
            debug!(name = %name, count = values.len(), "no did= value in TXT records");
            return Err(not_found(handle));
        };

        let did = Did::parse(value).map_err(|e| {
            IdentityError::InvalidSyntax(format!("invalid DID in TXT record for {handle}: {e}"))
        })?;
        debug!(handle = %handle, did = %did, "handle claimed via DNS");
        Ok(did)
    }

    /// The DID served at `https://<handle>/.well-known/atproto-did`.
    pub async fn resolve_well_known(
        &self,
        handle: &Handle,
        deadline: &Deadline,
    ) -> Result<Did, IdentityError> {
        self.reporter
            .report(Event::LookupAttempted(LookupMethod::WellKnown));
        let url = well_known_url(handle);

        let body = match self
            .http
            .fetch(&url, self.max_well_known_bytes, deadline)
            .await
        {
            Ok(body) => body,
            Err(TransportError::NotFound(_)) => return Err(not_found(handle)),
            Err(e) => {
                debug!(url = %url, error = %e, "well-known fetch failed");
                return Err(e.into());
            }
        };

        let text = String::from_utf8_lossy(&body);
        let did = Did::parse(text.trim()).map_err(|e| {
            IdentityError::InvalidSyntax(format!("invalid DID at {url}: {e}"))
        })?;
        debug!(handle = %handle, did = %did, "handle claimed via well-known");
        Ok(did)
    }
}

/// Pick the error to report when both lookups failed.
///
/// A DNS failure other than "not found" is the most specific answer. Next is
/// an HTTPS failure other than "not found". Only when both sources agree the
/// handle has no claim is the result `HandleNotFound`.
pub fn rank_errors(dns: IdentityError, http: IdentityError) -> IdentityError {
    if !dns.is_handle_not_found() {
        dns
    } else if !http.is_handle_not_found() {
        http
    } else {
        dns
    }
}

fn well_known_url(handle: &Handle) -> String {
    format!("https://{handle}/.well-known/atproto-did")
}

fn not_found(handle: &Handle) -> IdentityError {
    IdentityError::HandleNotFound {
        handle: handle.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CountingReporter;
    use crate::testing::{StaticDns, StaticHttp};
    use std::time::Duration;
    use test_case::test_case;

    const TXT_NAME: &str = "_atproto.alice.example.com";
    const WELL_KNOWN: &str = "https://alice.example.com/.well-known/atproto-did";

    fn alice() -> Handle {
        Handle::parse("alice.example.com").unwrap()
    }

    fn abc() -> Did {
        Did::parse("did:plc:abc123").unwrap()
    }

    fn resolver(dns: &Arc<StaticDns>, http: &Arc<StaticHttp>) -> HandleResolver {
        HandleResolver::new(dns.clone(), http.clone())
    }

    #[tokio::test]
    async fn test_dns_hit_skips_https() {
        let dns = Arc::new(StaticDns::new().with_txt(TXT_NAME, &["did=did:plc:abc123"]));
        let http = Arc::new(StaticHttp::new());

        let did = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap();
        assert_eq!(did, abc());
        assert_eq!(dns.calls(), 1);
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_prefixed_value_wins() {
        let dns = Arc::new(StaticDns::new().with_txt(
            TXT_NAME,
            &["v=spf1 -all", "did=did:plc:first", "did=did:plc:second"],
        ));
        let http = Arc::new(StaticHttp::new());

        let did = resolver(&dns, &http)
            .resolve_dns(&alice(), &Deadline::none())
            .await
            .unwrap();
        assert_eq!(did.as_str(), "did:plc:first");
    }

    #[tokio::test]
    async fn test_invalid_did_in_txt_is_syntax_error() {
        let dns = Arc::new(StaticDns::new().with_txt(TXT_NAME, &["did=not-a-did"]));
        let http = Arc::new(StaticHttp::new().with_body(WELL_KNOWN, "did:plc:abc123"));

        let err = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::InvalidSyntax(_)));
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_well_known() {
        let dns = Arc::new(StaticDns::new());
        let http = Arc::new(StaticHttp::new().with_body(WELL_KNOWN, "  did:plc:abc123\n"));

        let did = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap();
        assert_eq!(did, abc());
        assert_eq!(http.calls_to(WELL_KNOWN), 1);
    }

    #[tokio::test]
    async fn test_txt_without_did_falls_back() {
        let dns = Arc::new(StaticDns::new().with_txt(TXT_NAME, &["hello"]));
        let http = Arc::new(StaticHttp::new().with_body(WELL_KNOWN, "did:plc:abc123"));

        let did = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap();
        assert_eq!(did, abc());
    }

    #[tokio::test]
    async fn test_dns_error_beats_https_success() {
        let dns = Arc::new(StaticDns::new().with_error(
            TXT_NAME,
            TransportError::Dns("connection refused".into()),
        ));
        let http = Arc::new(StaticHttp::new().with_body(WELL_KNOWN, "did:plc:abc123"));

        let err = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IdentityError::Transport(TransportError::Dns("connection refused".into()))
        );
    }

    #[tokio::test]
    async fn test_parallel_dns_error_beats_https_success() {
        let dns = Arc::new(StaticDns::new().with_error(
            TXT_NAME,
            TransportError::Dns("connection refused".into()),
        ));
        let http = Arc::new(StaticHttp::new().with_body(WELL_KNOWN, "did:plc:abc123"));

        let err = resolver(&dns, &http)
            .with_fallback(FallbackMode::Parallel)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Transport(TransportError::Dns(_))
        ));
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_parallel_uses_https_when_dns_empty() {
        let dns = Arc::new(StaticDns::new());
        let http = Arc::new(StaticHttp::new().with_body(WELL_KNOWN, "did:plc:abc123"));

        let did = resolver(&dns, &http)
            .with_fallback(FallbackMode::Parallel)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap();
        assert_eq!(did, abc());
    }

    #[tokio::test]
    async fn test_well_known_status_is_not_not_found() {
        let dns = Arc::new(StaticDns::new());
        let http = Arc::new(StaticHttp::new().with_status(WELL_KNOWN, 404));

        let err = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Transport(TransportError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_both_missing_is_handle_not_found() {
        let dns = Arc::new(StaticDns::new());
        let http = Arc::new(StaticHttp::new());

        let err = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap_err();
        assert_eq!(err, IdentityError::HandleNotFound { handle: alice() });
    }

    #[tokio::test]
    async fn test_oversized_well_known_is_too_large() {
        let dns = Arc::new(StaticDns::new());
        let http = Arc::new(StaticHttp::new().with_body(WELL_KNOWN, vec![b'd'; 3000]));

        let err = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            IdentityError::TooLarge {
                limit: 2048,
                actual: Some(3000)
            }
        );
    }

    #[tokio::test]
    async fn test_reserved_tld_makes_no_calls() {
        let dns = Arc::new(StaticDns::new());
        let http = Arc::new(StaticHttp::new());
        let handle = Handle::parse("alice.test.local").unwrap();

        let err = resolver(&dns, &http)
            .resolve(&handle, &Deadline::none())
            .await
            .unwrap_err();
        assert!(err.is_handle_not_found());
        assert_eq!(dns.calls() + http.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_timeout() {
        let dns = Arc::new(StaticDns::new().with_delay(Duration::from_secs(10)));
        let http = Arc::new(StaticHttp::new());

        let err = resolver(&dns, &http)
            .resolve(&alice(), &Deadline::after(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err, IdentityError::Transport(TransportError::Timeout));
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_reports_lookups() {
        let dns = Arc::new(StaticDns::new());
        let http = Arc::new(StaticHttp::new().with_body(WELL_KNOWN, "did:plc:abc123"));
        let reporter = Arc::new(CountingReporter::new());

        resolver(&dns, &http)
            .with_reporter(reporter.clone())
            .resolve(&alice(), &Deadline::none())
            .await
            .unwrap();

        let stats = reporter.snapshot();
        assert_eq!(stats.dns_lookups, 1);
        assert_eq!(stats.well_known_lookups, 1);
    }

    fn handle_not_found() -> IdentityError {
        IdentityError::HandleNotFound { handle: alice() }
    }

    fn dns_refused() -> IdentityError {
        IdentityError::Transport(TransportError::Dns("refused".into()))
    }

    fn http_500() -> IdentityError {
        IdentityError::Transport(TransportError::Status {
            url: WELL_KNOWN.into(),
            status: 500,
        })
    }

    #[test_case(dns_refused(), handle_not_found(), dns_refused() ; "dns error over http not found")]
    #[test_case(dns_refused(), http_500(), dns_refused() ; "dns error over http error")]
    #[test_case(handle_not_found(), http_500(), http_500() ; "http error over dns not found")]
    #[test_case(handle_not_found(), handle_not_found(), handle_not_found() ; "both not found")]
    fn test_rank_errors(dns: IdentityError, http: IdentityError, expected: IdentityError) {
        assert_eq!(rank_errors(dns, http), expected);
    }
}
