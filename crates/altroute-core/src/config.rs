//! Configuration types for the routing system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::pinning::{ALTERNATIVE_SCOPE, PinEntry};

/// Main routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Default API domain (e.g. "api.example.com")
    pub primary_domain: String,

    /// DoH providers, in priority order
    pub doh_providers: Vec<DohProviderConfig>,

    /// Certificate pins (primary, per-domain, and `"*"` for discovered alternates)
    #[serde(default)]
    pub pins: Vec<PinEntry>,

    /// Whether discovered alternate domains may be used at all
    ///
    /// When off, a blocked primary is reported as unreachable without
    /// querying DoH providers and no cached proxy is restored.
    #[serde(default = "default_allow_alternative_routing")]
    pub allow_alternative_routing: bool,

    /// Discovery settings
    pub discovery: DiscoveryConfig,

    /// Transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Where discovered proxies are persisted
    #[serde(default)]
    pub proxy_cache: ProxyCacheConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl RoutingConfig {
    /// Create a configuration with defaults for everything but the required fields
    pub fn new(primary_domain: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            primary_domain: primary_domain.into(),
            doh_providers: Vec::new(),
            pins: Vec::new(),
            allow_alternative_routing: default_allow_alternative_routing(),
            discovery: DiscoveryConfig::new(zone),
            transport: TransportConfig::default(),
            proxy_cache: ProxyCacheConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Add a DoH provider (appended at lowest priority)
    pub fn with_doh_provider(mut self, query_template_url: impl Into<String>) -> Self {
        self.doh_providers.push(DohProviderConfig::new(query_template_url));
        self
    }

    /// Add a pin entry
    pub fn with_pin(mut self, domain: impl Into<String>, pin: impl Into<String>) -> Self {
        self.pins.push(PinEntry::new(domain, pin));
        self
    }

    /// Enable or disable alternative routing
    pub fn with_alternative_routing(mut self, allow: bool) -> Self {
        self.allow_alternative_routing = allow;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_domain_name(&self.primary_domain)?;

        if self.doh_providers.is_empty() {
            return Err(crate::Error::config("No DoH providers configured"));
        }
        for provider in &self.doh_providers {
            provider.validate()?;
        }

        for entry in &self.pins {
            if entry.domain != ALTERNATIVE_SCOPE {
                validate_domain_name(&entry.domain)?;
            }
            entry.decode()?;
        }

        self.discovery.validate()?;
        self.transport.validate()?;

        if self.engine.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        Ok(())
    }
}

/// A single DoH service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DohProviderConfig {
    /// RFC 8484 endpoint, e.g. "https://dns.google/dns-query"
    pub query_template_url: String,
}

impl DohProviderConfig {
    /// Create a provider configuration
    pub fn new(query_template_url: impl Into<String>) -> Self {
        Self {
            query_template_url: query_template_url.into(),
        }
    }

    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        let url = &self.query_template_url;
        if url.is_empty() {
            return Err(crate::Error::config("DoH provider URL cannot be empty"));
        }
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(crate::Error::config(format!(
                "DoH provider URL must use HTTP or HTTPS scheme. Got: {}",
                url
            )));
        }
        if url.starts_with("http://") {
            tracing::warn!("DoH provider {} uses plain HTTP", url);
        }
        Ok(())
    }
}

/// Discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// DNS zone hosting the encoded TXT records
    pub zone: String,

    /// Per-provider DoH query timeout (milliseconds)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Per-candidate reachability probe timeout (milliseconds)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How long a confirmed proxy stays eligible for restore after restart (seconds)
    #[serde(default = "default_proxy_validity_secs")]
    pub proxy_validity_secs: u64,
}

impl DiscoveryConfig {
    /// Create discovery settings for a zone with default timeouts
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            query_timeout_ms: default_query_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            proxy_validity_secs: default_proxy_validity_secs(),
        }
    }

    /// Per-provider query timeout
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Per-candidate probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Proxy validity window
    pub fn proxy_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.proxy_validity_secs.min(i64::MAX as u64) as i64)
    }

    /// Validate discovery settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_domain_name(&self.zone)?;
        if self.query_timeout_ms == 0 {
            return Err(crate::Error::config("DoH query timeout must be > 0"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(crate::Error::config("Probe timeout must be > 0"));
        }
        Ok(())
    }
}

/// Transport settings applied to every built client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// TCP/TLS connect timeout (seconds)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Path used by reachability probes
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
}

impl TransportConfig {
    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate transport settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.connect_timeout_secs == 0 || self.request_timeout_secs == 0 {
            return Err(crate::Error::config("Transport timeouts must be > 0"));
        }
        if !self.probe_path.starts_with('/') {
            return Err(crate::Error::config(format!(
                "Probe path must start with '/'. Got: {}",
                self.probe_path
            )));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            probe_path: default_probe_path(),
        }
    }
}

/// Proxy cache persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyCacheConfig {
    /// File-backed store
    File {
        /// Path to the JSON file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the routing event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_allow_alternative_routing() -> bool {
    true
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_proxy_validity_secs() -> u64 {
    24 * 60 * 60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_probe_path() -> String {
    "/tests/ping".to_string()
}

fn default_event_channel_capacity() -> usize {
    1000
}

/// Validate that a string is a valid domain name
///
/// Basic RFC 1035 checks; not comprehensive but catches common errors.
pub fn validate_domain_name(domain: &str) -> Result<(), crate::Error> {
    if domain.is_empty() {
        return Err(crate::Error::invalid_input("Domain name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(crate::Error::invalid_input(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        )));
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err(crate::Error::invalid_input(format!(
                "Domain name has empty label: '{}'",
                domain
            )));
        }

        if label.len() > 63 {
            return Err(crate::Error::invalid_input(format!(
                "Domain label too long: {} chars (max 63). Label: '{}'",
                label.len(),
                label
            )));
        }

        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(crate::Error::invalid_input(format!(
                "Domain label contains invalid characters. Label: '{}'",
                label
            )));
        }

        if label.starts_with('-') || label.ends_with('-') {
            return Err(crate::Error::invalid_input(format!(
                "Domain label cannot start or end with hyphen. Label: '{}'",
                label
            )));
        }
    }

    Ok(())
}

/// Normalize a domain as found in a TXT record or config
///
/// Trims whitespace, lowercases, drops a trailing root dot. Returns `None`
/// when the result is not a valid hostname.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    validate_domain_name(&domain).ok()?;
    Some(domain)
}
