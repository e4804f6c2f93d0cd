//! In-memory transports and resolvers for tests.
//!
//! Every stub counts its calls so tests can assert how much network work a
//! resolution would have done. Answers can be changed while a test runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::transport::{Deadline, HttpFetcher, TxtResolver};
use crate::{
    Did, DidDocument, DidMode, Handle, IdentityError, IdentityRecord, Resolver, TransportError,
    VerificationStatus,
};

/// DNS answers from a map. Unknown names are `NotFound`.
#[derive(Debug, Default)]
pub struct StaticDns {
    records: DashMap<String, Result<Vec<String>, TransportError>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StaticDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_txt(self, name: &str, values: &[&str]) -> Self {
        self.set_txt(name, values);
        self
    }

    pub fn with_error(self, name: &str, err: TransportError) -> Self {
        self.set_error(name, err);
        self
    }

    /// Every lookup sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_txt(&self, name: &str, values: &[&str]) {
        self.records.insert(
            normalize(name),
            Ok(values.iter().map(|v| v.to_string()).collect()),
        );
    }

    pub fn set_error(&self, name: &str, err: TransportError) {
        self.records.insert(normalize(name), Err(err));
    }

    pub fn remove(&self, name: &str) {
        self.records.remove(&normalize(name));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TxtResolver for StaticDns {
    async fn lookup_txt(
        &self,
        name: &str,
        deadline: &Deadline,
    ) -> Result<Vec<String>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = normalize(name);
        deadline
            .run(async {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                match self.records.get(&name) {
                    Some(answer) => answer.value().clone(),
                    None => Err(TransportError::NotFound(name.clone())),
                }
            })
            .await?
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// HTTP responses from a map keyed by URL.
///
/// Unknown URLs behave like a host that does not exist (`NotFound`). Bodies
/// over the caller's limit fail `TooLarge` with the body length as the
/// declared size.
#[derive(Debug, Default)]
pub struct StaticHttp {
    responses: DashMap<String, Result<Vec<u8>, TransportError>>,
    calls: AtomicUsize,
    calls_by_url: DashMap<String, usize>,
    delay: Option<Duration>,
}

impl StaticHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.set_body(url, body);
        self
    }

    pub fn with_json(self, url: &str, value: &serde_json::Value) -> Self {
        self.set_json(url, value);
        self
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.set_status(url, status);
        self
    }

    pub fn with_error(self, url: &str, err: TransportError) -> Self {
        self.set_error(url, err);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_body(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.responses.insert(url.to_string(), Ok(body.into()));
    }

    pub fn set_json(&self, url: &str, value: &serde_json::Value) {
        self.set_body(url, value.to_string());
    }

    pub fn set_status(&self, url: &str, status: u16) {
        self.set_error(
            url,
            TransportError::Status {
                url: url.to_string(),
                status,
            },
        );
    }

    pub fn set_error(&self, url: &str, err: TransportError) {
        self.responses.insert(url.to_string(), Err(err));
    }

    pub fn remove(&self, url: &str) {
        self.responses.remove(url);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls_by_url.get(url).map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl HttpFetcher for StaticHttp {
    async fn fetch(
        &self,
        url: &str,
        limit: usize,
        deadline: &Deadline,
    ) -> Result<Vec<u8>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_by_url.entry(url.to_string()).or_insert(0) += 1;

        deadline
            .run(async {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                let body = match self.responses.get(url).map(|answer| answer.value().clone()) {
                    Some(Ok(body)) => body,
                    Some(Err(e)) => return Err(e),
                    None => return Err(TransportError::NotFound(url.to_string())),
                };
                if body.len() > limit {
                    return Err(TransportError::TooLarge {
                        limit,
                        actual: Some(body.len() as u64),
                    });
                }
                Ok(body)
            })
            .await?
    }
}

/// A [`Resolver`] answering from maps, for exercising callers of the trait.
///
/// Handles default to `HandleNotFound` and DIDs to `DidNotFound`. DID answers
/// are the same in both modes.
#[derive(Debug, Default)]
pub struct StaticResolver {
    handles: DashMap<Handle, Result<IdentityRecord, IdentityError>>,
    dids: DashMap<Did, Result<IdentityRecord, IdentityError>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_handle(&self, handle: &Handle, outcome: Result<IdentityRecord, IdentityError>) {
        self.handles.insert(handle.clone(), outcome);
    }

    pub fn set_did(&self, did: &Did, outcome: Result<IdentityRecord, IdentityError>) {
        self.dids.insert(did.clone(), outcome);
    }

    /// Verified answers for `handle` and `did` in both directions.
    pub fn set_verified(&self, handle: &Handle, did: &Did) {
        let rec = record(did, Some(handle), VerificationStatus::Verified);
        self.set_handle(handle, Ok(rec.clone()));
        self.set_did(did, Ok(rec));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn pause(&self, deadline: &Deadline) -> Result<(), IdentityError> {
        if let Some(delay) = self.delay {
            deadline.run(tokio::time::sleep(delay)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve_handle(
        &self,
        handle: &Handle,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pause(deadline).await?;
        match self.handles.get(handle) {
            Some(outcome) => outcome.value().clone(),
            None => Err(IdentityError::HandleNotFound {
                handle: handle.clone(),
            }),
        }
    }

    async fn resolve_did(
        &self,
        did: &Did,
        _mode: DidMode,
        deadline: &Deadline,
    ) -> Result<IdentityRecord, IdentityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pause(deadline).await?;
        match self.dids.get(did) {
            Some(outcome) => outcome.value().clone(),
            None => Err(IdentityError::DidNotFound { did: did.clone() }),
        }
    }
}

/// A minimal DID document declaring `handles` as `at://` aliases.
pub fn document_json(did: &Did, handles: &[&str]) -> serde_json::Value {
    let aliases: Vec<String> = handles.iter().map(|h| format!("at://{h}")).collect();
    serde_json::json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": did.as_str(),
        "alsoKnownAs": aliases,
        "verificationMethod": [],
        "service": [{
            "id": "#atproto_pds",
            "type": "AtprotoPersonalDataServer",
            "serviceEndpoint": "https://pds.example.com"
        }]
    })
}

/// A record for `did` with the given status. `handle` becomes both the
/// verified and claimed handle when the status is `Verified`, and only the
/// claimed one otherwise.
pub fn record(did: &Did, handle: Option<&Handle>, status: VerificationStatus) -> IdentityRecord {
    let handles: Vec<&str> = handle.iter().map(|h| h.as_str()).collect();
    let document = DidDocument {
        context: None,
        id: did.clone(),
        also_known_as: handles.iter().map(|h| format!("at://{h}")).collect(),
        verification_method: Vec::new(),
        service: Vec::new(),
    };
    let rec = IdentityRecord::new(did.clone(), Arc::new(document), status);
    match (status, handle) {
        (VerificationStatus::Verified, Some(h)) => rec.with_handle(h.clone()),
        (_, h) => rec.with_claimed_handle(h.cloned()),
    }
}
