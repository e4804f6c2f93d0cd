//! HTTPS adapter over reqwest.

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::dns::NameNotFound;
use super::{Deadline, HickoryDns, HttpFetcher};
use crate::{ResolverConfig, TransportError};

/// Bounded HTTP GETs.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    http: Client,
}

impl ReqwestFetcher {
    /// Client using the system's address resolution.
    ///
    /// Without [`HickoryDns`] installed a missing host is reported as a generic
    /// HTTP error rather than `NotFound`.
    pub fn new(config: &ResolverConfig) -> Result<Self, TransportError> {
        Self::build(config, None)
    }

    /// Client resolving host names through `dns`, so NXDOMAIN is recognized.
    pub fn with_dns(config: &ResolverConfig, dns: HickoryDns) -> Result<Self, TransportError> {
        Self::build(config, Some(dns))
    }

    fn build(config: &ResolverConfig, dns: Option<HickoryDns>) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.http_timeout)
            .timeout(config.http_timeout);
        if let Some(dns) = dns {
            builder = builder.dns_resolver(Arc::new(dns));
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    async fn get_bounded(&self, url: &str, limit: usize) -> Result<Vec<u8>, TransportError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = %status, "non-success status");
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(declared) = response.content_length() {
            if declared > limit as u64 {
                return Err(TransportError::TooLarge {
                    limit,
                    actual: Some(declared),
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(url, &e))?
        {
            if body.len() + chunk.len() > limit {
                return Err(TransportError::TooLarge {
                    limit,
                    actual: None,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(
        &self,
        url: &str,
        limit: usize,
        deadline: &Deadline,
    ) -> Result<Vec<u8>, TransportError> {
        deadline.run(self.get_bounded(url, limit)).await?
    }
}

fn map_reqwest_error(url: &str, err: &reqwest::Error) -> TransportError {
    if let Some(missing) = find_name_not_found(err) {
        return TransportError::NotFound(missing.0.clone());
    }
    let mut message = format!("{url}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(&format!(": {cause}"));
        source = cause.source();
    }
    TransportError::Http(message)
}

fn find_name_not_found<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a NameNotFound> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<NameNotFound>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}
