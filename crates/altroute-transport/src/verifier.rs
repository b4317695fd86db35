// # Pinning Certificate Verifier
//
// rustls `ServerCertVerifier` for one domain. Unpinned domains get normal
// trust-store validation. Pinned domains are trusted on their keys alone: at
// least one certificate in the presented chain must match the SPKI pins, and
// the trust store is not consulted. A pin failure is reported as a dedicated
// error type so it can be told apart from every other handshake failure after
// reqwest and hyper have wrapped it.

use altroute_core::pinning::{PinPolicy, SpkiHash, spki_hash};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, OtherError, SignatureScheme};
use std::error::Error as StdError;
use std::sync::Arc;

/// Raised inside the TLS handshake when no presented key matches the pins
#[derive(Debug, Clone, thiserror::Error)]
#[error("certificate pin mismatch for {domain}")]
pub struct PinMismatchError {
    /// Domain whose chain was rejected
    pub domain: String,
}

/// Certificate verifier enforcing a [`PinPolicy`]
///
/// `inner` validates chains for [`PinPolicy::CaOnly`] and checks handshake
/// signatures for every policy.
#[derive(Debug)]
pub struct PinningVerifier {
    domain: String,
    policy: PinPolicy,
    inner: Arc<dyn ServerCertVerifier>,
}

impl PinningVerifier {
    /// Wrap `inner` (normally the webpki verifier) with `policy` for `domain`
    pub fn new(domain: impl Into<String>, policy: PinPolicy, inner: Arc<dyn ServerCertVerifier>) -> Self {
        Self {
            domain: domain.into(),
            policy,
            inner,
        }
    }

    fn chain_hashes(
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Result<Vec<SpkiHash>, rustls::Error> {
        std::iter::once(end_entity)
            .chain(intermediates)
            .map(|cert| {
                spki_hash(cert.as_ref())
                    .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))
            })
            .collect()
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if let PinPolicy::CaOnly = self.policy {
            return self
                .inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        }

        let chain = Self::chain_hashes(end_entity, intermediates)?;
        if self.policy.verify(&self.domain, &chain).is_err() {
            tracing::error!(
                "Certificate pin mismatch for {}: none of {} presented key(s) is pinned",
                self.domain,
                chain.len()
            );
            return Err(rustls::Error::InvalidCertificate(CertificateError::Other(
                OtherError(Arc::new(PinMismatchError {
                    domain: self.domain.clone(),
                })),
            )));
        }

        tracing::trace!("Certificate for {} matched a pinned key", self.domain);
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Whether `err` (or anything it wraps) is a [`PinMismatchError`]
///
/// Handshake errors reach us as reqwest → hyper → `io::Error` → `rustls::Error`.
/// `io::Error::source` skips the wrapped error, so `io::Error::get_ref` is
/// followed explicitly.
pub fn is_pin_mismatch(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);

    while let Some(err) = current {
        if err.is::<PinMismatchError>() {
            return true;
        }

        if let Some(rustls::Error::InvalidCertificate(CertificateError::Other(other))) =
            err.downcast_ref::<rustls::Error>()
        {
            if other.0.is::<PinMismatchError>() {
                return true;
            }
        }

        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if let Some(inner) = io.get_ref() {
                if is_pin_mismatch(inner) {
                    return true;
                }
            }
        }

        current = err.source();
    }

    false
}
