//! DID document model.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Did, Handle, IdentityError};

/// Fragment of the atproto signing key in `verificationMethod`.
const ATPROTO_KEY_FRAGMENT: &str = "atproto";

/// Fragment and type of the PDS entry in `service`.
const PDS_SERVICE_FRAGMENT: &str = "atproto_pds";
const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

/// A DID document as served by the PLC directory or a `did:web` host.
///
/// Documents are never edited after they are fetched; a refetch produces a
/// new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub id: Did,
    #[serde(default)]
    pub also_known_as: Vec<String>,
    #[serde(default)]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub service: Vec<Service>,
}

/// A key entry in `verificationMethod`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_multibase: Option<String>,
}

/// A service entry in `service`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub service_endpoint: serde_json::Value,
}

impl DidDocument {
    /// Parse a fetched document and check it describes `requested`.
    pub fn from_slice(body: &[u8], requested: &Did) -> Result<Self, IdentityError> {
        let doc: DidDocument = serde_json::from_slice(body)
            .map_err(|e| IdentityError::InvalidSyntax(format!("malformed DID document: {e}")))?;

        if &doc.id != requested {
            return Err(IdentityError::InvalidSyntax(format!(
                "document id {} does not match requested {}",
                doc.id, requested
            )));
        }

        Ok(doc)
    }

    /// Handles declared in `alsoKnownAs`, in document order.
    ///
    /// Entries that are not `at://` URIs or whose host is not a valid handle
    /// are skipped.
    pub fn handles(&self) -> Vec<Handle> {
        self.also_known_as
            .iter()
            .filter_map(|aka| aka.strip_prefix("at://"))
            .filter_map(|rest| Handle::parse(rest).ok())
            .collect()
    }

    /// Whether the document claims `handle` as an alias.
    pub fn declares_handle(&self, handle: &Handle) -> bool {
        self.handles().iter().any(|h| h == handle)
    }

    /// The atproto personal data server endpoint, if declared.
    pub fn pds_endpoint(&self) -> Option<Url> {
        self.service
            .iter()
            .find(|s| self.is_fragment(&s.id, PDS_SERVICE_FRAGMENT) && s.kind == PDS_SERVICE_TYPE)
            .and_then(|s| s.service_endpoint.as_str())
            .and_then(|endpoint| Url::parse(endpoint).ok())
    }

    /// The multibase-encoded atproto signing key, if declared.
    pub fn signing_key(&self) -> Option<&str> {
        self.verification_method
            .iter()
            .find(|m| self.is_fragment(&m.id, ATPROTO_KEY_FRAGMENT))
            .and_then(|m| m.public_key_multibase.as_deref())
    }

    /// Ids may be relative (`#atproto`) or absolute (`did:plc:x#atproto`).
    fn is_fragment(&self, id: &str, fragment: &str) -> bool {
        match id.split_once('#') {
            Some(("", frag)) => frag == fragment,
            Some((base, frag)) => frag == fragment && base == self.id.as_str(),
            None => false,
        }
    }
}
