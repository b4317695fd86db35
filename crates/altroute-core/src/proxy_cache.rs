//! Persisted cache of known-working alternate domains
//!
//! The cache keeps an in-memory copy of the record set and writes the whole
//! set through its [`ProxyStore`] on every change. At most one record is
//! active at any time, and every change that touches the active flag is a
//! single store write.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::traits::{ProxyRecord, ProxyStore};

/// Known-working alternate domains, with at most one active
pub struct ProxyCache {
    store: Arc<dyn ProxyStore>,
    records: Mutex<Vec<ProxyRecord>>,
}

impl ProxyCache {
    /// Load the cache from a store
    ///
    /// More than one active record on disk is repaired by keeping only the most
    /// recently confirmed one active; the repaired set is written back.
    pub async fn load(store: Arc<dyn ProxyStore>) -> Result<Self> {
        let mut records = store.load_records().await?;

        if repair_active(&mut records) {
            tracing::warn!("Repaired proxy cache with multiple active records");
            store.save_records(&records).await?;
        }

        tracing::debug!("Proxy cache loaded with {} record(s)", records.len());

        Ok(Self {
            store,
            records: Mutex::new(records),
        })
    }

    /// Record `domain` as confirmed working and make it the only active record
    pub async fn record_working(&self, domain: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();

        for record in next.iter_mut() {
            record.is_currently_active = false;
        }

        match next.iter_mut().find(|record| record.domain == domain) {
            Some(record) => {
                record.last_confirmed_working = Utc::now();
                record.is_currently_active = true;
            }
            None => next.push(ProxyRecord::confirmed_now(domain)),
        }

        self.store.save_records(&next).await?;
        *records = next;

        tracing::info!("Recorded working proxy domain: {}", domain);
        Ok(())
    }

    /// The active domain, if any
    ///
    /// `None` means "use the primary".
    pub async fn last_working_domain(&self) -> Option<String> {
        self.last_working_record().await.map(|record| record.domain)
    }

    /// The active record, if any
    pub async fn last_working_record(&self) -> Option<ProxyRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|record| record.is_currently_active)
            .cloned()
    }

    /// All records, active or not
    pub async fn records(&self) -> Vec<ProxyRecord> {
        self.records.lock().await.clone()
    }

    /// Clear the active flag, keeping every record
    pub async fn deactivate(&self) -> Result<()> {
        let mut records = self.records.lock().await;
        if !records.iter().any(|record| record.is_currently_active) {
            return Ok(());
        }

        let mut next = records.clone();
        for record in next.iter_mut() {
            record.is_currently_active = false;
        }

        self.store.save_records(&next).await?;
        *records = next;

        tracing::info!("Proxy cache deactivated; primary domain in use");
        Ok(())
    }

    /// Forget every record
    pub async fn clear(&self) -> Result<()> {
        let mut records = self.records.lock().await;
        self.store.save_records(&[]).await?;
        records.clear();

        tracing::info!("Proxy cache cleared");
        Ok(())
    }

    /// Replace the whole record set with `records`
    ///
    /// Undoes a `record_working` whose switch did not happen.
    pub(crate) async fn restore(&self, previous: Vec<ProxyRecord>) -> Result<()> {
        let mut records = self.records.lock().await;
        self.store.save_records(&previous).await?;
        *records = previous;

        tracing::debug!("Proxy cache restored to {} record(s)", records.len());
        Ok(())
    }

    /// Persist pending changes in the underlying store
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }
}

impl std::fmt::Debug for ProxyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCache").finish_non_exhaustive()
    }
}

/// Keep only the most recently confirmed active record active
fn repair_active(records: &mut [ProxyRecord]) -> bool {
    let active = records.iter().filter(|r| r.is_currently_active).count();
    if active <= 1 {
        return false;
    }

    let newest = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_currently_active)
        .max_by_key(|(_, r)| r.last_confirmed_working)
        .map(|(index, _)| index);

    for (index, record) in records.iter_mut().enumerate() {
        record.is_currently_active = Some(index) == newest;
    }
    true
}
