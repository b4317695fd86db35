//! Certificate pinning for non-default domains.
//!
//! Pins are base64-encoded SHA-256 hashes of a certificate's SPKI (Subject
//! Public Key Info), the same format OkHttp and HPKP use. The primary domain
//! is validated against the system trust store and additionally pinned when
//! pins exist for it. Every other domain must be pinned; a domain no pin can
//! cover is rejected rather than connected to unpinned.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// SHA-256 hash of a certificate's SPKI.
pub type SpkiHash = [u8; 32];

/// Pin entry domain that applies to every discovered alternate domain.
pub const ALTERNATIVE_SCOPE: &str = "*";

/// A single configured pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinEntry {
    /// Domain the pin applies to, or [`ALTERNATIVE_SCOPE`]
    pub domain: String,
    /// Base64 SHA-256 SPKI hash
    pub pin: String,
}

impl PinEntry {
    /// Create a pin entry
    pub fn new(domain: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            pin: pin.into(),
        }
    }

    /// Decode the base64 pin into a hash
    pub fn decode(&self) -> Result<SpkiHash> {
        decode_pin(&self.pin)
    }
}

/// Decode a base64 SPKI pin (an optional `sha256/` prefix is accepted).
pub fn decode_pin(pin: &str) -> Result<SpkiHash> {
    let raw = pin.trim().trim_start_matches("sha256/");
    let decoded = STANDARD
        .decode(raw)
        .map_err(|e| Error::config(format!("Invalid pin '{}': {}", pin, e)))?;

    if decoded.len() != 32 {
        return Err(Error::config(format!(
            "Invalid pin '{}': expected 32 bytes, got {}",
            pin,
            decoded.len()
        )));
    }

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&decoded);
    Ok(hash)
}

/// Encode a hash in pin form
pub fn encode_pin(hash: &SpkiHash) -> String {
    STANDARD.encode(hash)
}

/// Compute the SPKI hash of a DER-encoded certificate.
pub fn spki_hash(cert_der: &[u8]) -> Result<SpkiHash> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::invalid_input(format!("Unparseable certificate: {}", e)))?;

    Ok(Sha256::digest(cert.public_key().raw).into())
}

/// What a transport must enforce for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinPolicy {
    /// Trust-store validation only (primary domain without pins)
    CaOnly,
    /// At least one SPKI in the chain must match; the trust store is not consulted
    Pinned(Vec<SpkiHash>),
}

impl PinPolicy {
    /// Check the SPKI hashes of a presented chain against this policy
    pub fn verify(&self, domain: &str, chain: &[SpkiHash]) -> Result<()> {
        match self {
            PinPolicy::CaOnly => Ok(()),
            PinPolicy::Pinned(pins) => {
                if chain.iter().any(|hash| pins.contains(hash)) {
                    Ok(())
                } else {
                    Err(Error::pin_mismatch(domain))
                }
            }
        }
    }

    /// Whether this policy pins at all
    pub fn is_pinned(&self) -> bool {
        matches!(self, PinPolicy::Pinned(_))
    }
}

/// Immutable set of expected pins for the primary and alternate domains
#[derive(Debug, Clone)]
pub struct PinSet {
    primary: String,
    entries: Vec<(String, SpkiHash)>,
}

impl PinSet {
    /// Build a pin set, decoding and validating every entry
    pub fn new(primary: impl Into<String>, entries: &[PinEntry]) -> Result<Self> {
        let primary = primary.into().to_ascii_lowercase();
        let entries = entries
            .iter()
            .map(|entry| Ok((entry.domain.to_ascii_lowercase(), entry.decode()?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { primary, entries })
    }

    /// The primary domain
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Number of configured pins
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no pins are configured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn pins_in_scope(&self, scope: &str) -> Vec<SpkiHash> {
        self.entries
            .iter()
            .filter(|(domain, _)| domain == scope)
            .map(|(_, hash)| *hash)
            .collect()
    }

    /// Resolve the policy a transport for `domain` must enforce
    ///
    /// Lookup order: exact domain entries, then (alternates only) the
    /// [`ALTERNATIVE_SCOPE`] entries, then the primary's entries.
    pub fn policy_for(&self, domain: &str) -> Result<PinPolicy> {
        let domain = domain.to_ascii_lowercase();

        let exact = self.pins_in_scope(&domain);
        if !exact.is_empty() {
            return Ok(PinPolicy::Pinned(exact));
        }

        if domain == self.primary {
            return Ok(PinPolicy::CaOnly);
        }

        let alternative = self.pins_in_scope(ALTERNATIVE_SCOPE);
        if !alternative.is_empty() {
            return Ok(PinPolicy::Pinned(alternative));
        }

        let primary = self.pins_in_scope(&self.primary);
        if !primary.is_empty() {
            return Ok(PinPolicy::Pinned(primary));
        }

        Err(Error::untrusted(domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(byte: u8) -> String {
        encode_pin(&[byte; 32])
    }

    #[test]
    fn test_decode_pin() {
        let hash = decode_pin(&pin(7)).unwrap();
        assert_eq!(hash, [7u8; 32]);

        let prefixed = format!("sha256/{}", pin(7));
        assert_eq!(decode_pin(&prefixed).unwrap(), [7u8; 32]);

        assert!(decode_pin("AAAA").is_err());
        assert!(decode_pin("%%%").is_err());
    }

    #[test]
    fn test_primary_without_pins_is_ca_only() {
        let set = PinSet::new("api.example", &[PinEntry::new("*", pin(1))]).unwrap();
        assert_eq!(set.policy_for("api.example").unwrap(), PinPolicy::CaOnly);
    }

    #[test]
    fn test_exact_pins_win() {
        let set = PinSet::new(
            "api.example",
            &[
                PinEntry::new("*", pin(1)),
                PinEntry::new("alt1.example", pin(2)),
                PinEntry::new("api.example", pin(3)),
            ],
        )
        .unwrap();

        assert_eq!(
            set.policy_for("alt1.example").unwrap(),
            PinPolicy::Pinned(vec![[2u8; 32]])
        );
        assert_eq!(
            set.policy_for("alt2.example").unwrap(),
            PinPolicy::Pinned(vec![[1u8; 32]])
        );
        assert_eq!(
            set.policy_for("API.example").unwrap(),
            PinPolicy::Pinned(vec![[3u8; 32]])
        );
    }

    #[test]
    fn test_alternate_falls_back_to_primary_pins() {
        let set = PinSet::new("api.example", &[PinEntry::new("api.example", pin(3))]).unwrap();
        assert_eq!(
            set.policy_for("alt1.example").unwrap(),
            PinPolicy::Pinned(vec![[3u8; 32]])
        );
    }

    #[test]
    fn test_unpinnable_alternate_is_untrusted() {
        let set = PinSet::new("api.example", &[]).unwrap();
        let err = set.policy_for("alt1.example").unwrap_err();
        assert!(matches!(err, Error::UntrustedDomain(_)));
    }

    #[test]
    fn test_policy_verify() {
        let policy = PinPolicy::Pinned(vec![[1u8; 32]]);
        assert!(policy.verify("alt.example", &[[9u8; 32], [1u8; 32]]).is_ok());

        let err = policy.verify("alt.example", &[[9u8; 32]]).unwrap_err();
        assert!(matches!(err, Error::PinMismatch { .. }));

        assert!(PinPolicy::CaOnly.verify("api.example", &[]).is_ok());
    }

    #[test]
    fn test_spki_hash_matches_key() {
        let certified = rcgen::generate_simple_self_signed(vec!["alt.example".to_string()]).unwrap();
        let expected: SpkiHash = Sha256::digest(certified.key_pair.public_key_der()).into();

        let hash = spki_hash(certified.cert.der()).unwrap();
        assert_eq!(hash, expected);
    }

    #[test]
    fn test_spki_hash_rejects_garbage() {
        assert!(spki_hash(b"definitely not a certificate").is_err());
    }
}
