//! Identity records produced by the verifier.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::{Did, DidDocument, Handle};

/// Outcome of checking a handle/DID pair in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    /// Handle and document agree in both directions.
    Verified,
    /// The document was fetched but its handle claim was not checked, or is ambiguous.
    UnverifiedClaim,
    /// No handle could be verified for this DID.
    NotFound,
    /// The declared handle resolves to a different DID.
    Mismatch,
}

impl VerificationStatus {
    /// Whether a record with this status is a positive answer for caching.
    pub fn is_positive(self) -> bool {
        matches!(
            self,
            VerificationStatus::Verified | VerificationStatus::UnverifiedClaim
        )
    }
}

/// How much checking `resolve_did` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DidMode {
    /// Fetch the document only. Cheap; for bulk and internal callers.
    DocumentOnly,
    /// Fetch the document and resolve its declared handle back to the DID.
    #[default]
    Bidirectional,
}

/// A resolved identity.
///
/// Only the verifier builds these. The document is shared so records can be
/// cloned freely out of the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityRecord {
    /// Handle confirmed in both directions, if any.
    pub handle: Option<Handle>,
    /// Handle the document declares, verified or not.
    pub claimed_handle: Option<Handle>,
    pub did: Did,
    pub document: Arc<DidDocument>,
    pub status: VerificationStatus,
    pub resolved_at: DateTime<Utc>,
}

impl IdentityRecord {
    pub(crate) fn new(
        did: Did,
        document: Arc<DidDocument>,
        status: VerificationStatus,
    ) -> Self {
        Self {
            handle: None,
            claimed_handle: None,
            did,
            document,
            status,
            resolved_at: Utc::now(),
        }
    }

    pub(crate) fn with_handle(mut self, handle: Handle) -> Self {
        self.claimed_handle = Some(handle.clone());
        self.handle = Some(handle);
        self
    }

    pub(crate) fn with_claimed_handle(mut self, handle: Option<Handle>) -> Self {
        self.claimed_handle = handle;
        self
    }

    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }

    /// The verified handle, or `handle.invalid` when none verified.
    pub fn display_handle(&self) -> &str {
        self.handle
            .as_ref()
            .map(Handle::as_str)
            .unwrap_or(crate::syntax::INVALID_HANDLE)
    }

    pub fn pds_endpoint(&self) -> Option<Url> {
        self.document.pds_endpoint()
    }

    pub fn signing_key(&self) -> Option<&str> {
        self.document.signing_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: VerificationStatus) -> IdentityRecord {
        let did = Did::parse("did:plc:abc123").unwrap();
        let doc: DidDocument =
            serde_json::from_value(serde_json::json!({ "id": "did:plc:abc123" })).unwrap();
        IdentityRecord::new(did, Arc::new(doc), status)
    }

    #[test]
    fn test_display_handle_falls_back_to_invalid() {
        let rec = record(VerificationStatus::NotFound);
        assert_eq!(rec.display_handle(), "handle.invalid");

        let rec = record(VerificationStatus::Verified)
            .with_handle(Handle::parse("alice.example.com").unwrap());
        assert_eq!(rec.display_handle(), "alice.example.com");
        assert!(rec.is_verified());
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&VerificationStatus::UnverifiedClaim).unwrap(),
            "\"unverified-claim\""
        );
    }

    #[test]
    fn test_positive_statuses() {
        assert!(VerificationStatus::Verified.is_positive());
        assert!(VerificationStatus::UnverifiedClaim.is_positive());
        assert!(!VerificationStatus::NotFound.is_positive());
        assert!(!VerificationStatus::Mismatch.is_positive());
    }
}
