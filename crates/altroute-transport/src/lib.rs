//! Pinned HTTPS transport
//!
//! [`HttpsConnector`] implements [`TransportConnector`]: every transport it
//! builds gets its own rustls configuration carrying a [`PinningVerifier`]
//! for the transport's domain, so a pinned domain can never be reached over
//! an unpinned connection.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use altroute_core::pinning::PinPolicy;
//! use altroute_core::traits::TransportConnector;
//! use altroute_core::TransportConfig;
//! use altroute_transport::HttpsConnector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = HttpsConnector::new(TransportConfig::default());
//! let transport = connector.connect("api.example.com", &PinPolicy::CaOnly)?;
//! assert_eq!(transport.domain(), "api.example.com");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod verifier;

pub use client::ReqwestTransport;
pub use verifier::{PinMismatchError, PinningVerifier, is_pin_mismatch};

use altroute_core::config::TransportConfig;
use altroute_core::error::{Error, Result};
use altroute_core::pinning::PinPolicy;
use altroute_core::traits::{TransportClient, TransportConnector};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

/// Builds pinned reqwest transports
#[derive(Debug, Clone)]
pub struct HttpsConnector {
    config: TransportConfig,
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl HttpsConnector {
    /// Connector trusting the bundled Mozilla root set
    pub fn new(config: TransportConfig) -> Self {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        Self::with_roots(config, roots)
    }

    /// Connector trusting `roots` only
    pub fn with_roots(config: TransportConfig, roots: RootCertStore) -> Self {
        Self {
            config,
            roots: Arc::new(roots),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    fn tls_config(&self, domain: &str, policy: &PinPolicy) -> Result<ClientConfig> {
        let webpki = WebPkiServerVerifier::builder_with_provider(self.roots.clone(), self.provider.clone())
            .build()
            .map_err(|e| Error::config(format!("Failed to build certificate verifier: {}", e)))?;

        let verifier = PinningVerifier::new(domain, policy.clone(), webpki);

        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::config(format!("Failed to configure TLS versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        Ok(config)
    }
}

impl TransportConnector for HttpsConnector {
    fn connect(&self, domain: &str, policy: &PinPolicy) -> Result<Arc<dyn TransportClient>> {
        let tls = self.tls_config(domain, policy)?;

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout())
            .user_agent(concat!("altroute/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::http(format!("Failed to build client for {}: {}", domain, e)))?;

        tracing::debug!(
            "Built HTTPS transport for {} ({})",
            domain,
            if policy.is_pinned() { "pinned" } else { "CA only" }
        );

        Ok(Arc::new(ReqwestTransport::new(domain, format!("https://{}", domain), client)))
    }
}
