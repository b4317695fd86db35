//! Error types for the alternative routing system
//!
//! Only two conditions are meant to reach an end user: [`Error::DiscoveryExhausted`]
//! (shown as "cannot reach service") and [`Error::PinMismatch`] (shown as
//! "connection not trusted"). Everything else is an internal recovery step or a
//! programming/configuration error. See [`Error::user_facing`].

use thiserror::Error;

/// Result type alias for routing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the routing system
#[derive(Error, Debug)]
pub enum Error {
    /// A single DoH provider failed (timeout, network error, malformed answer).
    ///
    /// Recovered locally by moving to the next provider.
    #[error("DoH query failed ({provider}): {message}")]
    DohQueryFailed {
        /// Provider that failed (its query template URL)
        provider: String,
        /// Failure detail
        message: String,
    },

    /// No discovered candidate was reachable
    #[error("Discovery exhausted for {primary}: none of {candidates} candidate(s) reachable")]
    DiscoveryExhausted {
        /// Primary domain discovery ran for
        primary: String,
        /// Number of candidates that were tried
        candidates: usize,
    },

    /// Certificate pin verification failed
    #[error("Certificate pin mismatch for {domain}")]
    PinMismatch {
        /// Domain whose certificate did not match
        domain: String,
    },

    /// Transport construction failed while switching; the active endpoint is unchanged
    #[error("Switch to {domain} aborted: {reason}")]
    SwitchAborted {
        /// Target domain of the aborted switch
        domain: String,
        /// Why the client could not be built
        reason: String,
    },

    /// No pins are configured that could authenticate this domain
    #[error("Untrusted domain (no pins configured): {0}")]
    UntrustedDomain(String),

    /// Connectivity-class failure talking to a domain
    #[error("Domain unreachable ({domain}): {message}")]
    Unreachable {
        /// Domain that could not be reached
        domain: String,
        /// Failure detail
        message: String,
    },

    /// Non-connectivity HTTP failure (bad status, body read error)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Proxy store (persistence) errors
    #[error("Proxy store error: {0}")]
    ProxyStore(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// The two failure classes an end user is allowed to see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacingError {
    /// "cannot reach service"
    CannotReachService,
    /// "connection not trusted"
    ConnectionNotTrusted,
}

impl UserFacingError {
    /// Short message suitable for display
    pub fn message(&self) -> &'static str {
        match self {
            UserFacingError::CannotReachService => "cannot reach service",
            UserFacingError::ConnectionNotTrusted => "connection not trusted",
        }
    }
}

impl Error {
    /// Create a DoH query failure
    pub fn doh_query_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DohQueryFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a discovery exhausted error
    pub fn discovery_exhausted(primary: impl Into<String>, candidates: usize) -> Self {
        Self::DiscoveryExhausted {
            primary: primary.into(),
            candidates,
        }
    }

    /// Create a pin mismatch error
    pub fn pin_mismatch(domain: impl Into<String>) -> Self {
        Self::PinMismatch {
            domain: domain.into(),
        }
    }

    /// Create a switch aborted error
    pub fn switch_aborted(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SwitchAborted {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    /// Create an untrusted domain error
    pub fn untrusted(domain: impl Into<String>) -> Self {
        Self::UntrustedDomain(domain.into())
    }

    /// Create an unreachable error
    pub fn unreachable(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a proxy store error
    pub fn proxy_store(msg: impl Into<String>) -> Self {
        Self::ProxyStore(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this failure should make the request layer signal the primary as unreachable
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Io(_))
    }

    /// Whether this failure is security relevant (possible interception)
    pub fn is_security(&self) -> bool {
        matches!(self, Self::PinMismatch { .. } | Self::UntrustedDomain(_))
    }

    /// Map to the user-visible class, if any
    pub fn user_facing(&self) -> Option<UserFacingError> {
        match self {
            Self::DiscoveryExhausted { .. } => Some(UserFacingError::CannotReachService),
            Self::PinMismatch { .. } => Some(UserFacingError::ConnectionNotTrusted),
            _ => None,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
