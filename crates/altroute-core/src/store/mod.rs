// # Proxy Store Implementations
//
// Implementations of the ProxyStore trait, plus construction from
// configuration.

pub mod file;
pub mod memory;

pub use file::FileProxyStore;
pub use memory::MemoryProxyStore;

use std::sync::Arc;

use crate::config::ProxyCacheConfig;
use crate::error::Result;
use crate::traits::ProxyStore;

/// Open the store selected by `config`
pub async fn open_store(config: &ProxyCacheConfig) -> Result<Arc<dyn ProxyStore>> {
    match config {
        ProxyCacheConfig::File { path } => Ok(Arc::new(FileProxyStore::new(path).await?)),
        ProxyCacheConfig::Memory => Ok(Arc::new(MemoryProxyStore::new())),
    }
}
