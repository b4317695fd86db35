//! Builds and caches pinned transports per domain
//!
//! Each transport is built with the pin policy [`PinSet::policy_for`] resolves
//! for its domain. A domain that cannot be pinned is refused before the
//! connector is ever called. Rebuilding a domain replaces its cache entry;
//! holders of the previous `Arc` keep using it until they drop it, so
//! in-flight requests are never aborted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::pinning::PinSet;
use crate::traits::{TransportClient, TransportConnector};

/// Keyed collection of pinned transports
pub struct TransportFactory {
    connector: Arc<dyn TransportConnector>,
    pins: PinSet,
    clients: RwLock<HashMap<String, Arc<dyn TransportClient>>>,
    builds: AtomicUsize,
}

impl TransportFactory {
    /// Create a factory
    pub fn new(connector: Arc<dyn TransportConnector>, pins: PinSet) -> Self {
        Self {
            connector,
            pins,
            clients: RwLock::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// The pin set transports are built with
    pub fn pins(&self) -> &PinSet {
        &self.pins
    }

    /// Cached transport for `domain`, building one on first use
    pub fn build(&self, domain: &str) -> Result<Arc<dyn TransportClient>> {
        let domain = domain.to_ascii_lowercase();

        if let Some(client) = self.read_clients()?.get(&domain) {
            return Ok(client.clone());
        }

        let mut clients = self.write_clients()?;
        // Another caller may have built it while we waited for the write lock
        if let Some(client) = clients.get(&domain) {
            return Ok(client.clone());
        }

        let client = self.construct(&domain)?;
        clients.insert(domain, client.clone());
        Ok(client)
    }

    /// Discard any cached transport for `domain` and build a fresh one
    ///
    /// On failure the previous transport stays cached.
    pub fn rebuild_for(&self, domain: &str) -> Result<Arc<dyn TransportClient>> {
        let domain = domain.to_ascii_lowercase();
        let client = self.construct(&domain)?;

        let previous = self.write_clients()?.insert(domain.clone(), client.clone());
        if previous.is_some() {
            tracing::debug!("Replaced transport for {}", domain);
        }
        Ok(client)
    }

    /// Drop the cached transport for `domain`, if any
    pub fn evict(&self, domain: &str) -> Result<bool> {
        Ok(self
            .write_clients()?
            .remove(&domain.to_ascii_lowercase())
            .is_some())
    }

    /// Whether a transport for `domain` is cached
    pub fn is_cached(&self, domain: &str) -> bool {
        self.read_clients()
            .map(|clients| clients.contains_key(&domain.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Number of transports constructed so far
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    fn construct(&self, domain: &str) -> Result<Arc<dyn TransportClient>> {
        let policy = match self.pins.policy_for(domain) {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!("Refusing transport for {}: {}", domain, e);
                return Err(e);
            }
        };

        let client = self.connector.connect(domain, &policy)?;
        self.builds.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            "Built transport for {} ({})",
            domain,
            if policy.is_pinned() { "pinned" } else { "CA only" }
        );
        Ok(client)
    }

    fn read_clients(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn TransportClient>>>> {
        self.clients
            .read()
            .map_err(|_| Error::Other("Transport cache lock poisoned".to_string()))
    }

    fn write_clients(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn TransportClient>>>> {
        self.clients
            .write()
            .map_err(|_| Error::Other("Transport cache lock poisoned".to_string()))
    }
}

impl std::fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportFactory")
            .field("pins", &self.pins)
            .field("builds", &self.build_count())
            .finish_non_exhaustive()
    }
}
