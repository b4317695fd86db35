//! Sole owner of the active endpoint
//!
//! A switch runs in three steps, in this order:
//!
//! 1. rebuild the target's entry in the [`ApiClientRegistry`]
//! 2. publish the new [`ActiveEndpoint`]
//! 3. announce it to subscribers and the event channel
//!
//! Switches are serialized behind a FIFO lock, so a queued switch to another
//! domain applies after the running one and the last one wins. A failed
//! rebuild aborts the switch with the active endpoint untouched.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio_stream::wrappers::WatchStream;

use crate::config::normalize_domain;
use crate::error::{Error, Result};
use crate::events::{EventSink, RoutingEvent};
use crate::registry::{ApiClient, ApiClientRegistry};

/// The endpoint all outbound API traffic currently uses
///
/// Replaced, never edited. Requests that grabbed an older value finish on it.
#[derive(Debug, Clone)]
pub struct ActiveEndpoint {
    /// Active domain
    pub domain: String,
    /// Client bound to `domain`
    pub client: Arc<ApiClient>,
    /// Number of switches applied before this value was published
    pub generation: u64,
    /// When this value was published
    pub switched_at: DateTime<Utc>,
}

/// Serialized mutator of the [`ActiveEndpoint`]
pub struct EndpointSwitcher {
    registry: Arc<ApiClientRegistry>,
    active: watch::Sender<Arc<ActiveEndpoint>>,
    switch_lock: Mutex<()>,
    events: EventSink,
}

impl EndpointSwitcher {
    /// Create a switcher starting on `initial_domain`
    pub fn new(
        registry: Arc<ApiClientRegistry>,
        initial_domain: &str,
        events: EventSink,
    ) -> Result<Self> {
        let domain = canonical(initial_domain)?;
        let client = registry.get(&domain)?;

        let (active, _) = watch::channel(Arc::new(ActiveEndpoint {
            domain,
            client,
            generation: 0,
            switched_at: Utc::now(),
        }));

        Ok(Self {
            registry,
            active,
            switch_lock: Mutex::new(()),
            events,
        })
    }

    /// Make `domain` the active endpoint
    ///
    /// Switching to the already active domain is a no-op and builds nothing.
    /// Fails with [`Error::SwitchAborted`] when the client cannot be built.
    pub async fn switch_to(&self, domain: &str) -> Result<Arc<ActiveEndpoint>> {
        let domain = canonical(domain)?;
        let _switching = self.switch_lock.lock().await;

        let current = self.active();
        if current.domain == domain && self.registry.contains(&domain) {
            tracing::debug!("Already using {}, switch skipped", domain);
            return Ok(current);
        }

        let client = match self.registry.rebuild(&domain) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Switch to {} aborted: {}", domain, e);
                self.events.emit(RoutingEvent::SwitchAborted {
                    domain: domain.clone(),
                    reason: e.to_string(),
                });
                return Err(Error::switch_aborted(domain, e.to_string()));
            }
        };

        let next = Arc::new(ActiveEndpoint {
            domain: domain.clone(),
            client,
            generation: current.generation + 1,
            switched_at: Utc::now(),
        });
        self.active.send_replace(next.clone());

        if current.domain != domain {
            if let Err(e) = self.registry.invalidate(&current.domain) {
                tracing::warn!("Failed to invalidate {}: {}", current.domain, e);
            }
        }

        tracing::info!("Switched active endpoint {} -> {}", current.domain, domain);
        self.events.emit(RoutingEvent::Switched {
            from: current.domain.clone(),
            to: domain,
            generation: next.generation,
        });

        Ok(next)
    }

    /// Current active endpoint
    pub fn active(&self) -> Arc<ActiveEndpoint> {
        self.active.borrow().clone()
    }

    /// Current active domain
    pub fn active_domain(&self) -> String {
        self.active.borrow().domain.clone()
    }

    /// Watch the active endpoint
    pub fn subscribe(&self) -> watch::Receiver<Arc<ActiveEndpoint>> {
        self.active.subscribe()
    }

    /// Stream of active endpoints, starting with the current one
    pub fn changes(&self) -> WatchStream<Arc<ActiveEndpoint>> {
        WatchStream::new(self.subscribe())
    }

    /// Registry the switcher maintains
    pub fn registry(&self) -> &Arc<ApiClientRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for EndpointSwitcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointSwitcher")
            .field("active", &self.active_domain())
            .finish_non_exhaustive()
    }
}

fn canonical(domain: &str) -> Result<String> {
    normalize_domain(domain)
        .ok_or_else(|| Error::invalid_input(format!("Not a valid domain: {:?}", domain)))
}
