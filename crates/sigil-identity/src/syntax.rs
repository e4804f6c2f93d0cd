//! Handle and DID syntax.
//!
//! Both types can only be built through `parse`, so holding one means the
//! string already passed the grammar check and is safe to put on the wire.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::IdentityError;

/// Longest handle accepted, matching the DNS name limit.
const MAX_HANDLE_LENGTH: usize = 253;

/// Longest DID accepted.
const MAX_DID_LENGTH: usize = 2048;

/// Handle used by servers to mark an identity whose handle failed verification.
pub const INVALID_HANDLE: &str = "handle.invalid";

/// Top-level domains that are never resolved over the network.
const RESERVED_TLDS: &[&str] = &[
    "alt",
    "arpa",
    "example",
    "internal",
    "invalid",
    "local",
    "localhost",
    "onion",
];

static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]([a-z0-9-]{0,61}[a-z0-9])?$")
        .expect("handle regex is valid")
});

static DID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").expect("DID regex is valid")
});

/// A validated, lowercase handle such as `alice.example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
    /// Parse and normalize a handle.
    ///
    /// Input is lowercased and a single trailing dot (fully-qualified form) is
    /// dropped before the grammar check.
    ///
    /// # Example
    ///
    /// ```
    /// use sigil_identity::Handle;
    ///
    /// let handle = Handle::parse("Alice.Example.COM.").unwrap();
    /// assert_eq!(handle.as_str(), "alice.example.com");
    /// assert!(Handle::parse("no_underscores.com").is_err());
    /// ```
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
        let normalized = trimmed.to_ascii_lowercase();

        if normalized.is_empty() {
            return Err(IdentityError::InvalidSyntax("empty handle".to_string()));
        }
        if normalized.len() > MAX_HANDLE_LENGTH {
            return Err(IdentityError::InvalidSyntax(format!(
                "handle longer than {MAX_HANDLE_LENGTH} characters"
            )));
        }
        if !HANDLE_RE.is_match(&normalized) {
            return Err(IdentityError::InvalidSyntax(format!(
                "invalid handle: {input}"
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last label of the handle.
    pub fn tld(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Whether the handle sits under a TLD that must never be looked up.
    pub fn has_reserved_tld(&self) -> bool {
        RESERVED_TLDS.contains(&self.tld())
    }

    /// Whether this is the `handle.invalid` marker.
    pub fn is_invalid_marker(&self) -> bool {
        self.0 == INVALID_HANDLE
    }

    /// The `at://` URI form used in `alsoKnownAs`.
    pub fn to_uri(&self) -> String {
        format!("at://{}", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Handle {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Handle {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Handle> for String {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

/// DID methods this crate knows how to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DidMethod {
    /// Resolved through the PLC directory.
    Plc,
    /// Resolved from `https://<domain>/.well-known/did.json`.
    Web,
}

/// A syntactically valid DID, e.g. `did:plc:abc123`.
///
/// Parsing accepts any method; whether the method is supported is decided by
/// [`Did::supported_method`] when the DID is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    /// Parse a DID string.
    ///
    /// # Example
    ///
    /// ```
    /// use sigil_identity::Did;
    ///
    /// let did = Did::parse("did:plc:abc123").unwrap();
    /// assert_eq!(did.method(), "plc");
    /// assert_eq!(did.identifier(), "abc123");
    /// ```
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let input = input.trim();
        if input.len() > MAX_DID_LENGTH {
            return Err(IdentityError::InvalidSyntax(format!(
                "DID longer than {MAX_DID_LENGTH} characters"
            )));
        }
        if !DID_RE.is_match(input) {
            return Err(IdentityError::InvalidSyntax(format!("invalid DID: {input}")));
        }
        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The method name, e.g. `plc`.
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Everything after `did:<method>:`.
    pub fn identifier(&self) -> &str {
        let prefix_len = "did:".len() + self.method().len() + 1;
        &self.0[prefix_len..]
    }

    /// The resolvable method, or `UnsupportedMethod`.
    pub fn supported_method(&self) -> Result<DidMethod, IdentityError> {
        match self.method() {
            "plc" => Ok(DidMethod::Plc),
            "web" => Ok(DidMethod::Web),
            other => Err(IdentityError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Did {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Did {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

/// Either side of an identity: what callers usually have in hand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AtIdentifier {
    Handle(Handle),
    Did(Did),
}

impl AtIdentifier {
    /// Strings starting with `did:` are DIDs, anything else must be a handle.
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let input = input.trim();
        if input.starts_with("did:") {
            Did::parse(input).map(AtIdentifier::Did)
        } else {
            Handle::parse(input).map(AtIdentifier::Handle)
        }
    }
}

impl fmt::Display for AtIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtIdentifier::Handle(h) => h.fmt(f),
            AtIdentifier::Did(d) => d.fmt(f),
        }
    }
}

impl FromStr for AtIdentifier {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Handle> for AtIdentifier {
    fn from(handle: Handle) -> Self {
        AtIdentifier::Handle(handle)
    }
}

impl From<Did> for AtIdentifier {
    fn from(did: Did) -> Self {
        AtIdentifier::Did(did)
    }
}
