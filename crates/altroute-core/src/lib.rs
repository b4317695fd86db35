// # altroute-core
//
// Core library for alternative routing: keeps a client talking to its API
// when the primary domain is blocked or unreachable.
//
// ## Architecture Overview
//
// - **PinSet**: SPKI pins that authenticate the primary and alternate domains
// - **DohResolver**: discovers alternate domains through DNS-over-HTTPS TXT records
// - **ProxyCache**: persisted record of alternates that were confirmed working
// - **TransportFactory**: builds and caches pinned transports per domain
// - **ApiClientRegistry**: versioned domain to client mapping read by every request
// - **EndpointSwitcher**: sole, serialized mutator of the active endpoint
// - **EndpointConfigurator**: discovery cycle (resolve, probe, record, switch)
// - **RoutingEngine**: facade wiring everything together
//
// Network and disk access go through the traits in [`traits`]; the
// `altroute-doh` and `altroute-transport` crates implement them.

pub mod config;
pub mod configurator;
pub mod engine;
pub mod error;
pub mod events;
pub mod pinning;
pub mod proxy_cache;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod switcher;
pub mod traits;
pub mod transport_factory;

// Re-export core types for convenience
pub use config::{
    DiscoveryConfig, DohProviderConfig, EngineConfig, ProxyCacheConfig, RoutingConfig,
    TransportConfig,
};
pub use configurator::{DiscoveryState, EndpointConfigurator, ProbeSettings};
pub use engine::RoutingEngine;
pub use error::{Error, Result, UserFacingError};
pub use events::{EventSink, RoutingEvent};
pub use pinning::{PinEntry, PinPolicy, PinSet, SpkiHash};
pub use proxy_cache::ProxyCache;
pub use registry::{ApiClient, ApiClientRegistry, RegistrySnapshot};
pub use resolver::DohResolver;
pub use store::{FileProxyStore, MemoryProxyStore};
pub use switcher::{ActiveEndpoint, EndpointSwitcher};
pub use traits::{
    ApiRequest, ApiResponse, DohProvider, HttpMethod, ProxyRecord, ProxyStore, TransportClient,
    TransportConnector,
};
pub use transport_factory::TransportFactory;
