//! Transport adapters: one external protocol call each.
//!
//! Adapters return raw, unvalidated payloads. Interpreting them (and deciding
//! what "not found" means) is the resolvers' job.

mod dns;
mod http;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::TransportError;

pub use dns::HickoryDns;
pub use http::ReqwestFetcher;

/// DNS TXT lookups.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// All TXT strings published at `name`.
    ///
    /// A missing name or an empty answer is `TransportError::NotFound`.
    async fn lookup_txt(&self, name: &str, deadline: &Deadline)
    -> Result<Vec<String>, TransportError>;
}

/// HTTPS GETs with a body ceiling.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Fetch `url` and return its body.
    ///
    /// Fails with `Status` on non-2xx, `TooLarge` when the declared or actual
    /// body exceeds `limit` bytes, and `NotFound` when the host name does not
    /// exist.
    async fn fetch(
        &self,
        url: &str,
        limit: usize,
        deadline: &Deadline,
    ) -> Result<Vec<u8>, TransportError>;
}

/// A caller's cancellation token plus an optional point in time.
///
/// Cloning shares the token, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    token: CancellationToken,
    expires_at: Option<Instant>,
}

impl Deadline {
    /// No time limit; only explicit cancellation stops the call.
    pub fn none() -> Self {
        Self::default()
    }

    /// Expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            expires_at: Some(Instant::now() + timeout),
        }
    }

    /// Use `token` as the cancellation source.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Fail fast if the deadline is already spent.
    pub fn check(&self) -> Result<(), TransportError> {
        if self.token.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match self.expires_at {
            Some(at) if Instant::now() >= at => Err(TransportError::Timeout),
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it finishes, the token is cancelled, or time runs out.
    ///
    /// On cancellation or expiry `fut` is dropped, which aborts whatever
    /// network call it was making.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TransportError> {
        self.check()?;

        let expiry = async {
            match self.expires_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TransportError::Cancelled),
            _ = expiry => Err(TransportError::Timeout),
            out = fut => Ok(out),
        }
    }
}
