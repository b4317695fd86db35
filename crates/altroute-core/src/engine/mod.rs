//! Routing engine
//!
//! The [`RoutingEngine`] wires every component together and is the surface
//! request-issuing code talks to.
//!
//! ## Architecture
//!
//! ```text
//!  request fails ──► notify_primary_unreachable()
//!                            │
//!                            ▼
//!                 ┌──────────────────────┐     ┌─────────────┐
//!                 │ EndpointConfigurator │────►│ DohResolver │──► DoH providers
//!                 └──────────────────────┘     └─────────────┘
//!                   │ probe           │ record
//!                   ▼                 ▼
//!        ┌──────────────────┐   ┌────────────┐
//!        │ TransportFactory │   │ ProxyCache │──► ProxyStore
//!        └──────────────────┘   └────────────┘
//!                   ▲
//!                   │ rebuild
//!        ┌───────────────────┐    ┌──────────────────┐
//!        │ ApiClientRegistry │◄───│ EndpointSwitcher │──► ActiveEndpoint watchers
//!        └───────────────────┘    └──────────────────┘
//! ```
//!
//! ## Startup
//!
//! 1. Load the proxy cache
//! 2. Build the primary client
//! 3. Switch to the cached proxy if it was confirmed within the validity window
//!    and alternative routing is allowed

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::{RoutingConfig, normalize_domain};
use crate::configurator::{DiscoveryState, EndpointConfigurator, ProbeSettings};
use crate::error::{Error, Result};
use crate::events::{EventSink, RoutingEvent};
use crate::pinning::PinSet;
use crate::proxy_cache::ProxyCache;
use crate::registry::{ApiClient, ApiClientRegistry};
use crate::resolver::DohResolver;
use crate::switcher::{ActiveEndpoint, EndpointSwitcher};
use crate::traits::{ApiRequest, ApiResponse, DohProvider, ProxyStore, TransportConnector};
use crate::transport_factory::TransportFactory;

/// Alternative routing engine
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct RoutingEngine {
    primary: String,
    cache: Arc<ProxyCache>,
    switcher: Arc<EndpointSwitcher>,
    configurator: EndpointConfigurator,
    events: EventSink,
    alternative_routing: AtomicBool,
}

impl RoutingEngine {
    /// Create an engine
    ///
    /// # Parameters
    ///
    /// - `config`: routing configuration (validated here)
    /// - `doh_providers`: providers in priority order
    /// - `connector`: builds pinned transports
    /// - `store`: persistence for known proxies
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields routing events
    pub async fn new(
        config: RoutingConfig,
        doh_providers: Vec<Box<dyn DohProvider>>,
        connector: Arc<dyn TransportConnector>,
        store: Arc<dyn ProxyStore>,
    ) -> Result<(Self, mpsc::Receiver<RoutingEvent>)> {
        config.validate()?;

        if doh_providers.is_empty() {
            return Err(Error::config("At least one DoH provider is required"));
        }

        let primary = normalize_domain(&config.primary_domain).ok_or_else(|| {
            Error::config(format!("Invalid primary domain: {}", config.primary_domain))
        })?;

        let (events, rx) = EventSink::channel(config.engine.event_channel_capacity);

        let pins = PinSet::new(&primary, &config.pins)?;
        let factory = Arc::new(TransportFactory::new(connector, pins));
        let registry = Arc::new(ApiClientRegistry::new(factory));
        let cache = Arc::new(ProxyCache::load(store).await?);
        let switcher = Arc::new(EndpointSwitcher::new(registry, &primary, events.clone())?);

        let resolver = DohResolver::new(
            doh_providers,
            config.discovery.query_timeout(),
            config.discovery.zone.clone(),
        );
        let configurator = EndpointConfigurator::new(
            resolver,
            cache.clone(),
            switcher.clone(),
            ProbeSettings {
                path: config.transport.probe_path.clone(),
                timeout: config.discovery.probe_timeout(),
            },
            events.clone(),
        );

        let engine = Self {
            primary,
            cache,
            switcher,
            configurator,
            events,
            alternative_routing: AtomicBool::new(config.allow_alternative_routing),
        };

        let restored = if engine.alternative_routing_allowed() {
            engine.restore_proxy(config.discovery.proxy_validity()).await
        } else {
            info!("Alternative routing disabled, staying on primary {}", engine.primary);
            false
        };
        info!(
            "Routing engine started on {}{}",
            engine.active_domain(),
            if restored { " (restored proxy)" } else { "" }
        );
        engine.events.emit(RoutingEvent::Started {
            domain: engine.active_domain(),
            restored_proxy: restored,
        });

        Ok((engine, rx))
    }

    /// Switch to the cached proxy if it is still within its validity window
    async fn restore_proxy(&self, validity: chrono::Duration) -> bool {
        let Some(record) = self.cache.last_working_record().await else {
            debug!("No cached proxy, using primary {}", self.primary);
            return false;
        };

        if record.is_stale(validity) {
            info!(
                "Cached proxy {} last confirmed {}, too old; using primary",
                record.domain, record.last_confirmed_working
            );
            self.deactivate_cache().await;
            return false;
        }

        match self.switcher.switch_to(&record.domain).await {
            Ok(active) => {
                self.configurator.set_state(DiscoveryState::Switched {
                    domain: active.domain.clone(),
                });
                true
            }
            Err(e) => {
                warn!("Failed to restore cached proxy {}: {}", record.domain, e);
                self.deactivate_cache().await;
                false
            }
        }
    }

    async fn deactivate_cache(&self) {
        if let Err(e) = self.cache.deactivate().await {
            warn!("Failed to deactivate cached proxy: {}", e);
        }
    }

    /// Signal a connectivity failure on the primary domain
    ///
    /// Runs (or joins) a discovery cycle and returns the domain now active.
    /// With alternative routing disabled no DoH query is made and the call
    /// fails with [`Error::DiscoveryExhausted`] for zero candidates.
    pub async fn notify_primary_unreachable(&self) -> Result<String> {
        if !self.alternative_routing_allowed() {
            info!(
                "Primary {} unreachable; alternative routing disabled, not searching",
                self.primary
            );
            return Err(Error::discovery_exhausted(&self.primary, 0));
        }

        self.configurator.on_primary_unreachable().await
    }

    /// Whether discovered alternates may be used
    pub fn alternative_routing_allowed(&self) -> bool {
        self.alternative_routing.load(Ordering::SeqCst)
    }

    /// Allow or forbid alternative routing
    ///
    /// Forbidding it while a proxy is active reverts to the primary.
    pub async fn set_alternative_routing(&self, allow: bool) -> Result<()> {
        let was = self.alternative_routing.swap(allow, Ordering::SeqCst);
        if was != allow {
            info!("Alternative routing {}", if allow { "enabled" } else { "disabled" });
        }

        if !allow && !self.is_using_primary() {
            self.revert_to_primary().await?;
        }
        Ok(())
    }

    /// Client for the active endpoint
    pub fn get_active_client(&self) -> Arc<ApiClient> {
        self.switcher.active().client.clone()
    }

    /// Client for `domain`, or for the active endpoint when `None`
    pub fn get_client(&self, domain: Option<&str>) -> Result<Arc<ApiClient>> {
        let active = self.switcher.active();
        match domain {
            None => Ok(active.client.clone()),
            Some(domain) if domain.eq_ignore_ascii_case(&active.domain) => {
                Ok(active.client.clone())
            }
            Some(domain) => self.switcher.registry().get(domain),
        }
    }

    /// Issue `request` on the active endpoint
    ///
    /// A connectivity failure on the primary runs discovery and retries the
    /// request once on the new endpoint. A connectivity failure on a proxy
    /// reverts routing to the primary and returns the original error.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let active = self.switcher.active();

        let error = match active.client.send(request.clone()).await {
            Err(e) if e.is_connectivity() => e,
            other => return other,
        };

        if active.domain != self.primary {
            warn!("Proxy {} unreachable: {}. Reverting to primary.", active.domain, error);
            if let Err(e) = self.revert_to_primary().await {
                warn!("Failed to revert to primary: {}", e);
            }
            return Err(error);
        }

        // Another caller may already have switched away
        if self.switcher.active().generation == active.generation {
            warn!("Primary {} unreachable: {}", self.primary, error);
            self.notify_primary_unreachable().await?;
        }

        let retry = self.switcher.active();
        debug!("Retrying request on {}", retry.domain);
        retry.client.send(request).await
    }

    /// Route back to the primary and deactivate the cached proxy
    pub async fn revert_to_primary(&self) -> Result<()> {
        let from = self.active_domain();
        self.switcher.switch_to(&self.primary).await?;
        self.cache.deactivate().await?;
        self.configurator.set_state(DiscoveryState::UsingPrimary);

        if from != self.primary {
            info!("Reverted from {} to primary {}", from, self.primary);
            self.events.emit(RoutingEvent::RevertedToPrimary { from });
        }
        Ok(())
    }

    /// Primary domain
    pub fn primary_domain(&self) -> &str {
        &self.primary
    }

    /// Active domain
    pub fn active_domain(&self) -> String {
        self.switcher.active_domain()
    }

    /// Whether the primary is active
    pub fn is_using_primary(&self) -> bool {
        self.active_domain() == self.primary
    }

    /// Watch the active endpoint
    pub fn subscribe(&self) -> watch::Receiver<Arc<ActiveEndpoint>> {
        self.switcher.subscribe()
    }

    /// Current discovery state
    pub fn discovery_state(&self) -> DiscoveryState {
        self.configurator.state()
    }

    /// Known proxies
    pub fn proxy_cache(&self) -> &Arc<ProxyCache> {
        &self.cache
    }

    /// Client registry
    pub fn registry(&self) -> &Arc<ApiClientRegistry> {
        self.switcher.registry()
    }
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("primary", &self.primary)
            .field("active", &self.active_domain())
            .finish_non_exhaustive()
    }
}
