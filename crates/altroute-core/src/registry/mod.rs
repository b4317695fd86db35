//! Versioned registry of API clients
//!
//! The registry maps domains to [`ApiClient`]s. Every change produces a new
//! immutable [`RegistrySnapshot`]; readers take the current snapshot with a single
//! `Arc` clone and never observe a half-applied change.
//!
//! Writers (lazy construction, rebuild, invalidation) are serialized. Only
//! [`crate::EndpointSwitcher`] rebuilds or invalidates entries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::traits::{ApiRequest, ApiResponse, TransportClient};
use crate::transport_factory::TransportFactory;

/// Protocol client bound to one domain
pub struct ApiClient {
    domain: String,
    transport: Arc<dyn TransportClient>,
    generation: u64,
}

impl ApiClient {
    /// Domain every request goes to
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Registry version this client was created in
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Underlying transport
    pub fn transport(&self) -> &Arc<dyn TransportClient> {
        &self.transport
    }

    /// Send a request
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        tracing::trace!("{} https://{}{}", request.method, self.domain, request.path);
        self.transport.execute(request).await
    }

    /// GET `path`
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    /// POST `body` to `path`
    pub async fn post(&self, path: &str, body: impl Into<Vec<u8>>) -> Result<ApiResponse> {
        self.send(ApiRequest::post(path, body)).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("domain", &self.domain)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Immutable view of the registry at one version
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    version: u64,
    clients: HashMap<String, Arc<ApiClient>>,
}

impl RegistrySnapshot {
    /// Version number; increases with every change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Client for `domain` in this snapshot
    pub fn get(&self, domain: &str) -> Option<Arc<ApiClient>> {
        self.clients.get(&domain.to_ascii_lowercase()).cloned()
    }

    /// Domains with a client
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<_> = self.clients.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Number of clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the snapshot holds no clients
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn with(&self, client: Arc<ApiClient>) -> Self {
        let mut clients = self.clients.clone();
        clients.insert(client.domain.clone(), client);
        Self {
            version: self.version + 1,
            clients,
        }
    }

    fn without(&self, domain: &str) -> Self {
        let mut clients = self.clients.clone();
        clients.remove(domain);
        Self {
            version: self.version + 1,
            clients,
        }
    }
}

/// Domain to API client mapping shared by every request call site
pub struct ApiClientRegistry {
    factory: Arc<TransportFactory>,
    current: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
}

impl ApiClientRegistry {
    /// Create an empty registry
    pub fn new(factory: Arc<TransportFactory>) -> Self {
        Self {
            factory,
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            writer: Mutex::new(()),
        }
    }

    /// Factory used to build transports
    pub fn factory(&self) -> &Arc<TransportFactory> {
        &self.factory
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether `domain` has a client in the latest snapshot
    pub fn contains(&self, domain: &str) -> bool {
        self.snapshot().get(domain).is_some()
    }

    /// Client for `domain`, constructing it on first access
    pub fn get(&self, domain: &str) -> Result<Arc<ApiClient>> {
        if let Some(client) = self.snapshot().get(domain) {
            return Ok(client);
        }

        let _writer = self.lock_writer()?;
        let current = self.snapshot();
        if let Some(client) = current.get(domain) {
            return Ok(client);
        }

        let transport = self.factory.build(domain)?;
        let client = self.client_for(&current, transport);
        self.publish(current.with(client.clone()))?;
        Ok(client)
    }

    /// Replace the client for `domain` with one on a freshly built transport
    ///
    /// On failure the registry is left exactly as it was.
    pub fn rebuild(&self, domain: &str) -> Result<Arc<ApiClient>> {
        let _writer = self.lock_writer()?;
        let current = self.snapshot();

        let transport = self.factory.rebuild_for(domain)?;
        let client = self.client_for(&current, transport);
        self.publish(current.with(client.clone()))?;

        tracing::debug!("Registry rebuilt {} at version {}", client.domain, client.generation);
        Ok(client)
    }

    /// Drop the client for `domain`; the next `get` builds a new one
    pub fn invalidate(&self, domain: &str) -> Result<()> {
        let domain = domain.to_ascii_lowercase();
        let _writer = self.lock_writer()?;
        let current = self.snapshot();

        if current.get(&domain).is_none() {
            return Ok(());
        }

        self.publish(current.without(&domain))?;
        self.factory.evict(&domain)?;
        tracing::debug!("Registry invalidated {}", domain);
        Ok(())
    }

    fn client_for(
        &self,
        current: &RegistrySnapshot,
        transport: Arc<dyn TransportClient>,
    ) -> Arc<ApiClient> {
        Arc::new(ApiClient {
            domain: transport.domain().to_ascii_lowercase(),
            transport,
            generation: current.version + 1,
        })
    }

    fn publish(&self, next: RegistrySnapshot) -> Result<()> {
        let mut current = self
            .current
            .write()
            .map_err(|_| Error::Other("Registry lock poisoned".to_string()))?;
        *current = Arc::new(next);
        Ok(())
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| Error::Other("Registry writer lock poisoned".to_string()))
    }
}

impl std::fmt::Debug for ApiClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClientRegistry")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinning::{PinEntry, PinPolicy, PinSet, encode_pin};
    use crate::traits::TransportConnector;
    use async_trait::async_trait;

    struct EchoTransport(String);

    #[async_trait]
    impl TransportClient for EchoTransport {
        fn domain(&self) -> &str {
            &self.0
        }

        async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
            Ok(ApiResponse::new(200, format!("{}{}", self.0, request.path)))
        }

        async fn probe(&self, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    struct EchoConnector;

    impl TransportConnector for EchoConnector {
        fn connect(&self, domain: &str, _policy: &PinPolicy) -> Result<Arc<dyn TransportClient>> {
            Ok(Arc::new(EchoTransport(domain.to_string())))
        }
    }

    fn registry() -> ApiClientRegistry {
        let pins = PinSet::new("api.example", &[PinEntry::new("*", encode_pin(&[2; 32]))]).unwrap();
        ApiClientRegistry::new(Arc::new(TransportFactory::new(Arc::new(EchoConnector), pins)))
    }

    #[tokio::test]
    async fn test_get_builds_lazily_and_caches() {
        let registry = registry();
        assert!(!registry.contains("api.example"));

        let client = registry.get("api.example").unwrap();
        assert_eq!(client.domain(), "api.example");
        assert!(Arc::ptr_eq(&client, &registry.get("api.example").unwrap()));
        assert_eq!(registry.factory().build_count(), 1);

        let response = client.get("/users").await.unwrap();
        assert_eq!(response.text(), "api.example/users");
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let registry = registry();
        registry.get("api.example").unwrap();
        let before = registry.snapshot();

        registry.rebuild("alt1.example").unwrap();
        let after = registry.snapshot();

        assert!(before.get("alt1.example").is_none());
        assert!(after.get("alt1.example").is_some());
        assert!(after.version() > before.version());
    }

    #[test]
    fn test_rebuild_replaces_client() {
        let registry = registry();
        let old = registry.get("alt1.example").unwrap();
        let new = registry.rebuild("alt1.example").unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(new.generation() > old.generation());
        assert_eq!(registry.factory().build_count(), 2);
    }

    #[test]
    fn test_failed_rebuild_leaves_registry_untouched() {
        let pins = PinSet::new("api.example", &[]).unwrap();
        let registry =
            ApiClientRegistry::new(Arc::new(TransportFactory::new(Arc::new(EchoConnector), pins)));
        registry.get("api.example").unwrap();
        let before = registry.snapshot();

        assert!(registry.rebuild("unpinned.example").is_err());
        assert_eq!(registry.snapshot().version(), before.version());
    }

    #[test]
    fn test_invalidate() {
        let registry = registry();
        registry.get("alt1.example").unwrap();
        registry.invalidate("alt1.example").unwrap();
        assert!(!registry.contains("alt1.example"));
        assert!(!registry.factory().is_cached("alt1.example"));

        registry.get("alt1.example").unwrap();
        assert_eq!(registry.factory().build_count(), 2);
    }
}
