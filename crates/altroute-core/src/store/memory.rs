// # Memory Proxy Store
//
// In-memory ProxyStore. Known proxies are lost on restart, so every start
// begins on the primary domain.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::proxy_store::{ProxyRecord, ProxyStore};

/// In-memory proxy store
///
/// Clones share the same records, which lets tests inspect what a
/// [`crate::ProxyCache`] wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryProxyStore {
    inner: Arc<RwLock<Vec<ProxyRecord>>>,
    saves: Arc<std::sync::atomic::AtomicUsize>,
}

impl MemoryProxyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records
    pub fn with_records(records: Vec<ProxyRecord>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(records)),
            saves: Arc::default(),
        }
    }

    /// Current records
    pub async fn snapshot(&self) -> Vec<ProxyRecord> {
        self.inner.read().await.clone()
    }

    /// Number of `save_records` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyStore {
    async fn load_records(&self) -> Result<Vec<ProxyRecord>, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn save_records(&self, records: &[ProxyRecord]) -> Result<(), Error> {
        *self.inner.write().await = records.to_vec();
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
