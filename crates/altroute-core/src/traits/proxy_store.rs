// # Proxy Store Trait
//
// Persistence for the set of alternate domains that were confirmed working.
//
// The whole record set is written at once so the "at most one active record"
// invariant is never split across two writes.
//
// ## Implementations
//
// - File-based: JSON file with atomic replace and backup
// - Memory: tests and embedders without persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A known-working alternate domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    /// The alternate domain
    pub domain: String,
    /// Last time a probe through this domain succeeded
    pub last_confirmed_working: DateTime<Utc>,
    /// Whether this domain is the one currently in use
    pub is_currently_active: bool,
}

impl ProxyRecord {
    /// Create an active record confirmed now
    pub(crate) fn confirmed_now(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            last_confirmed_working: Utc::now(),
            is_currently_active: true,
        }
    }

    /// Check if the record is older than `max_age`
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        Utc::now().signed_duration_since(self.last_confirmed_working) > max_age
    }
}

/// Trait for proxy store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently. [`crate::ProxyCache`]
/// serializes its own writes, so stores need not order concurrent saves.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Load every persisted record
    ///
    /// A store with nothing persisted yet returns an empty set.
    async fn load_records(&self) -> Result<Vec<ProxyRecord>, crate::Error>;

    /// Replace the persisted set with `records` in a single write
    async fn save_records(&self, records: &[ProxyRecord]) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
