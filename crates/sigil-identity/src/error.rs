//! Error types for identity resolution.

use thiserror::Error;

use crate::{Did, Handle};

/// Failures of a single transport call (DNS or HTTPS).
///
/// These are produced by the adapters in [`crate::transport`] and mapped into
/// [`IdentityError`] by the resolvers, which know whether a missing name means
/// "handle not found" or "DID not found".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The queried name or record does not exist (NXDOMAIN or an empty answer).
    #[error("name not found: {0}")]
    NotFound(String),

    /// DNS lookup failed for a reason other than absence.
    #[error("DNS error: {0}")]
    Dns(String),

    /// HTTP request failed before a status was received, or the body could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Server answered with a non-2xx status.
    #[error("HTTP status {status} from {url}")]
    Status { url: String, status: u16 },

    /// Response body exceeded the configured ceiling.
    #[error("response too large: limit {limit} bytes{}", size_suffix(.actual))]
    TooLarge { limit: usize, actual: Option<u64> },

    /// The caller's deadline passed.
    #[error("deadline exceeded")]
    Timeout,

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

fn size_suffix(actual: &Option<u64>) -> String {
    match actual {
        Some(n) => format!(", got {n}"),
        None => String::new(),
    }
}

/// Coarse category of an [`IdentityError`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    HandleNotFound,
    DidNotFound,
    UnsupportedMethod,
    InvalidSyntax,
    Mismatch,
    Transport,
    TooLarge,
}

/// Errors that can occur while resolving or verifying an identity.
///
/// Cloneable so that a single in-flight resolution can hand the same failure
/// to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Neither DNS nor the well-known endpoint claims a DID for this handle.
    #[error("handle not found: {handle}")]
    HandleNotFound { handle: Handle },

    /// The DID has no document at its authoritative source.
    #[error("DID not found: {did}")]
    DidNotFound { did: Did },

    /// DID method outside the supported set.
    #[error("unsupported DID method: {0}")]
    UnsupportedMethod(String),

    /// Malformed handle, DID, or DID document.
    #[error("invalid syntax: {0}")]
    InvalidSyntax(String),

    /// The handle claims a DID whose document does not declare the handle back.
    #[error("handle {handle} claims {did}, but its document does not declare the handle")]
    Mismatch {
        handle: Handle,
        did: Did,
        /// Aliases the document does declare.
        declared: Vec<String>,
    },

    /// The handle claimed `did`, but its document could not be fetched.
    ///
    /// Reports as the kind of the underlying failure.
    #[error("{handle} claims {did}, but its document could not be fetched: {source}")]
    DocumentUnavailable {
        handle: Handle,
        did: Did,
        source: Box<IdentityError>,
    },

    /// Network failure, timeout, or cancellation.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Response exceeded the size ceiling.
    #[error("response too large: limit {limit} bytes")]
    TooLarge { limit: usize, actual: Option<u64> },
}

impl IdentityError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::HandleNotFound { .. } => ErrorKind::HandleNotFound,
            IdentityError::DidNotFound { .. } => ErrorKind::DidNotFound,
            IdentityError::UnsupportedMethod(_) => ErrorKind::UnsupportedMethod,
            IdentityError::InvalidSyntax(_) => ErrorKind::InvalidSyntax,
            IdentityError::Mismatch { .. } => ErrorKind::Mismatch,
            IdentityError::DocumentUnavailable { source, .. } => source.kind(),
            IdentityError::Transport(_) => ErrorKind::Transport,
            IdentityError::TooLarge { .. } => ErrorKind::TooLarge,
        }
    }

    pub fn is_handle_not_found(&self) -> bool {
        matches!(self, IdentityError::HandleNotFound { .. })
    }

    /// True for the cancellation outcome of a deadline.
    pub fn is_cancelled(&self) -> bool {
        match self {
            IdentityError::Transport(TransportError::Cancelled) => true,
            IdentityError::DocumentUnavailable { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether this failure is stable enough to remember for a short while.
    ///
    /// Only "does not exist" and "claims disagree" answers qualify. Transport
    /// trouble, oversized responses and local syntax errors are never cached.
    pub fn is_cacheable_failure(&self) -> bool {
        matches!(
            self,
            IdentityError::HandleNotFound { .. }
                | IdentityError::DidNotFound { .. }
                | IdentityError::Mismatch { .. }
        )
    }

    /// The DID known at the time of failure, if any.
    pub fn claimed_did(&self) -> Option<&Did> {
        match self {
            IdentityError::DidNotFound { did }
            | IdentityError::Mismatch { did, .. }
            | IdentityError::DocumentUnavailable { did, .. } => Some(did),
            _ => None,
        }
    }
}

impl From<TransportError> for IdentityError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::TooLarge { limit, actual } => IdentityError::TooLarge { limit, actual },
            other => IdentityError::Transport(other),
        }
    }
}
