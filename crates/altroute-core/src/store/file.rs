// # File Proxy Store
//
// JSON file persistence for proxy records, surviving restarts and crashes.
//
// ## Crash Recovery
//
// - Atomic writes: the full record set goes to a `.tmp` file, then is renamed over the main file
// - Backup: the previous main file is copied to `.backup` before each replace
// - Recovery: an unparseable main file is restored from the backup
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": [
//     {
//       "domain": "alt1.example",
//       "last_confirmed_working": "2025-01-09T12:00:00Z",
//       "is_currently_active": true
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::traits::proxy_store::{ProxyRecord, ProxyStore};

const PROXY_FILE_VERSION: &str = "1.0";

/// File-based proxy store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use altroute_core::store::FileProxyStore;
/// use altroute_core::traits::ProxyStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileProxyStore::new("/var/lib/altroute/proxies.json").await?;
///     let records = store.load_records().await?;
///     println!("{} known proxies", records.len());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileProxyStore {
    path: PathBuf,
    // Serializes temp-file writes so two saves never share the temp path
    write_lock: Mutex<()>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ProxyFileFormat {
    version: String,
    records: Vec<ProxyRecord>,
}

impl FileProxyStore {
    /// Create a store at `path`, creating parent directories if needed
    ///
    /// A corrupted main file is restored from its backup here, so later loads
    /// read a consistent file.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create proxy store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let store = Self {
            path,
            write_lock: Mutex::new(()),
        };
        store.load_with_recovery().await?;
        Ok(store)
    }

    /// Path of the main file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_with_recovery(&self) -> Result<Vec<ProxyRecord>, Error> {
        let Some(content) = Self::read_file(&self.path).await? else {
            return Ok(Vec::new());
        };

        match Self::parse(&content) {
            Ok(records) => {
                tracing::debug!("Loaded {} proxy record(s) from {}", records.len(), self.path.display());
                Ok(records)
            }
            Err(e) => {
                tracing::warn!(
                    "Proxy store {} appears corrupted: {}. Attempting recovery from backup.",
                    self.path.display(),
                    e
                );
                self.recover_from_backup().await
            }
        }
    }

    async fn recover_from_backup(&self) -> Result<Vec<ProxyRecord>, Error> {
        let backup_path = Self::backup_path(&self.path);
        let Some(content) = Self::read_file(&backup_path).await? else {
            tracing::warn!("No proxy store backup found. Starting with no known proxies.");
            return Ok(Vec::new());
        };

        match Self::parse(&content) {
            Ok(records) => {
                tracing::info!("Recovered {} proxy record(s) from backup", records.len());
                if let Err(e) = fs::copy(&backup_path, &self.path).await {
                    tracing::error!("Failed to restore proxy store from backup: {}", e);
                }
                Ok(records)
            }
            Err(e) => {
                tracing::error!(
                    "Proxy store backup also corrupted: {}. Starting with no known proxies.",
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    async fn read_file(path: &Path) -> Result<Option<String>, Error> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::proxy_store(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn parse(content: &str) -> Result<Vec<ProxyRecord>, serde_json::Error> {
        let file: ProxyFileFormat = serde_json::from_str(content)?;
        if file.version != PROXY_FILE_VERSION {
            tracing::warn!(
                "Proxy store version mismatch: expected {}, got {}. Attempting to load anyway.",
                PROXY_FILE_VERSION,
                file.version
            );
        }
        Ok(file.records)
    }

    async fn write_records(&self, records: &[ProxyRecord]) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;

        let json = serde_json::to_string_pretty(&ProxyFileFormat {
            version: PROXY_FILE_VERSION.to_string(),
            records: records.to_vec(),
        })
        .map_err(|e| Error::proxy_store(format!("Failed to serialize proxy records: {}", e)))?;

        let temp_path = Self::temp_path(&self.path);
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::proxy_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::proxy_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::proxy_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create proxy store backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::proxy_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Proxy records written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        path.with_extension("tmp")
    }

    fn backup_path(path: &Path) -> PathBuf {
        path.with_extension("backup")
    }
}

#[async_trait]
impl ProxyStore for FileProxyStore {
    async fn load_records(&self) -> Result<Vec<ProxyRecord>, Error> {
        self.load_with_recovery().await
    }

    async fn save_records(&self, records: &[ProxyRecord]) -> Result<(), Error> {
        self.write_records(records).await
    }

    async fn flush(&self) -> Result<(), Error> {
        // Every save is written through
        Ok(())
    }
}
