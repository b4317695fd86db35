//! DoH discovery of alternate domains
//!
//! Alternate domains are published as TXT strings under a name derived from
//! the primary hostname: `d` + unpadded base32 of the hostname, followed by the
//! discovery zone. Providers are asked in priority order; every provider gets
//! its own timeout, and a failing provider only costs its own answer.

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::normalize_domain;
use crate::error::Error;
use crate::traits::DohProvider;

/// Queries DoH providers for candidate alternate domains
pub struct DohResolver {
    providers: Vec<Box<dyn DohProvider>>,
    query_timeout: Duration,
    zone: String,
}

impl DohResolver {
    /// Create a resolver over `providers`, tried in the given order
    pub fn new(
        providers: Vec<Box<dyn DohProvider>>,
        query_timeout: Duration,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            providers,
            query_timeout,
            zone: zone.into().trim_end_matches('.').to_ascii_lowercase(),
        }
    }

    /// Number of configured providers
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// TXT record name that carries the alternates for `primary`
    pub fn txt_query_name(&self, primary: &str) -> String {
        let host = primary.trim().trim_end_matches('.').to_ascii_lowercase();
        let encoded = data_encoding::BASE32_NOPAD.encode(host.as_bytes());
        format!("d{}.{}", encoded.to_ascii_lowercase(), self.zone)
    }

    /// Resolve candidate alternate domains for `primary`
    ///
    /// Returns the union of every succeeding provider's candidates,
    /// deduplicated in first-seen order. Returns an empty list when every
    /// provider fails; that is not an error.
    pub async fn resolve(&self, primary: &str) -> Vec<String> {
        let name = self.txt_query_name(primary);
        let primary = normalize_domain(primary).unwrap_or_else(|| primary.to_ascii_lowercase());

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut succeeded = 0usize;

        for provider in &self.providers {
            let strings = match self.query(provider.as_ref(), &name).await {
                Ok(strings) => strings,
                Err(e) => {
                    tracing::warn!("{}", e);
                    continue;
                }
            };
            succeeded += 1;

            for raw in strings {
                let Some(domain) = normalize_domain(&raw) else {
                    tracing::debug!("Ignoring invalid candidate from {}: {:?}", provider.provider_name(), raw);
                    continue;
                };
                if domain == primary {
                    continue;
                }
                if seen.insert(domain.clone()) {
                    candidates.push(domain);
                }
            }
        }

        if succeeded == 0 {
            tracing::warn!("All {} DoH provider(s) failed for {}", self.providers.len(), name);
        } else {
            tracing::info!(
                "Resolved {} candidate(s) for {} from {} provider(s)",
                candidates.len(),
                primary,
                succeeded
            );
        }

        candidates
    }

    async fn query(&self, provider: &dyn DohProvider, name: &str) -> Result<Vec<String>, Error> {
        tracing::debug!("Querying {} for TXT {}", provider.provider_name(), name);

        match timeout(self.query_timeout, provider.query_txt(name)).await {
            Ok(Ok(strings)) => Ok(strings),
            Ok(Err(e @ Error::DohQueryFailed { .. })) => Err(e),
            Ok(Err(e)) => Err(Error::doh_query_failed(provider.provider_name(), e.to_string())),
            Err(_) => Err(Error::doh_query_failed(
                provider.provider_name(),
                format!("timed out after {:?}", self.query_timeout),
            )),
        }
    }
}

impl std::fmt::Debug for DohResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DohResolver")
            .field("providers", &self.providers.len())
            .field("query_timeout", &self.query_timeout)
            .field("zone", &self.zone)
            .finish()
    }
}
