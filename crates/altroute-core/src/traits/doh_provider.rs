// # DoH Provider Trait
//
// Defines the interface for a single DNS-over-HTTPS resolver endpoint.
//
// ## Implementations
//
// - RFC 8484: `altroute-doh` crate
//
// ## Usage
//
// ```rust,ignore
// use altroute_core::DohProvider;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let provider = /* DohProvider implementation */;
//
//     let strings = provider.query_txt("dmfzgc4dfon2c4zlm.alt.example").await?;
//     println!("{:?}", strings);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::config::DohProviderConfig;

/// Trait for DoH provider implementations
///
/// A provider answers TXT queries. It does not interpret the strings, dedupe
/// them, or apply timeouts; [`crate::DohResolver`] owns all of that.
///
/// # Errors
///
/// Any failure (network error, non-success status, undecodable message,
/// non-NOERROR response code) must be returned as
/// [`crate::Error::DohQueryFailed`] so the resolver can move on to the next
/// provider.
#[async_trait]
pub trait DohProvider: Send + Sync {
    /// Query TXT records for `name` and return every character-string found
    async fn query_txt(&self, name: &str) -> Result<Vec<String>, crate::Error>;

    /// Identifier used in logs and errors (normally the query template URL)
    fn provider_name(&self) -> &str;
}

/// Helper trait for constructing DoH providers from configuration
pub trait DohProviderFactory: Send + Sync {
    /// Create a provider for one configured endpoint
    fn create(&self, config: &DohProviderConfig) -> Result<Box<dyn DohProvider>, crate::Error>;

    /// Create providers for every configured endpoint, preserving order
    fn create_all(
        &self,
        configs: &[DohProviderConfig],
    ) -> Result<Vec<Box<dyn DohProvider>>, crate::Error> {
        configs.iter().map(|config| self.create(config)).collect()
    }
}
