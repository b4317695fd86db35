//! Test doubles shared by the routing contract tests
//!
//! `ScriptedNetwork` plays the role of the internet: every host has a
//! reachability behavior and the SPKI hash its certificate would present.
//! Transports built from it enforce the pin policy they were built with on
//! every "handshake", so pin failures surface exactly where a real TLS
//! transport would report them.

#![allow(dead_code)]

use altroute_core::error::{Error, Result};
use altroute_core::pinning::{PinPolicy, SpkiHash, encode_pin};
use altroute_core::traits::{
    ApiRequest, ApiResponse, DohProvider, ProxyStore, TransportClient, TransportConnector,
};
use altroute_core::{RoutingConfig, RoutingEngine, RoutingEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const PRIMARY: &str = "api.example";
pub const ZONE: &str = "routing.example.net";

/// Key presented by hosts operated by the service
pub const SERVICE_KEY: SpkiHash = [0x11; 32];
/// Key presented by an interceptor
pub const ROGUE_KEY: SpkiHash = [0x66; 32];

/// How a host reacts to connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Handshake and requests succeed
    Reachable,
    /// Connection refused
    Unreachable,
    /// Connection never completes
    Hang,
    /// Connector refuses to build a client at all
    RefuseBuild,
}

#[derive(Debug, Clone, Copy)]
struct Host {
    behavior: Behavior,
    key: SpkiHash,
}

#[derive(Debug, Default)]
struct NetworkState {
    hosts: HashMap<String, Host>,
    builds: HashMap<String, usize>,
    build_limits: HashMap<String, usize>,
    probes: Vec<String>,
    requests: Vec<String>,
}

/// Scripted set of hosts, usable as a `TransportConnector`
#[derive(Debug, Clone, Default)]
pub struct ScriptedNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a host
    pub fn host(self, domain: &str, behavior: Behavior, key: SpkiHash) -> Self {
        self.state
            .lock()
            .unwrap()
            .hosts
            .insert(domain.to_string(), Host { behavior, key });
        self
    }

    /// Refuse to build more than `limit` clients for `domain`
    pub fn build_limit(self, domain: &str, limit: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .build_limits
            .insert(domain.to_string(), limit);
        self
    }

    /// Change a host's behavior
    pub fn set_behavior(&self, domain: &str, behavior: Behavior) {
        if let Some(host) = self.state.lock().unwrap().hosts.get_mut(domain) {
            host.behavior = behavior;
        }
    }

    /// Clients built for `domain`
    pub fn builds(&self, domain: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .builds
            .get(domain)
            .copied()
            .unwrap_or(0)
    }

    /// Domains probed, in order
    pub fn probes(&self) -> Vec<String> {
        self.state.lock().unwrap().probes.clone()
    }

    /// Domains that served a request, in order
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    fn host_of(&self, domain: &str) -> Option<Host> {
        self.state.lock().unwrap().hosts.get(domain).copied()
    }
}

impl TransportConnector for ScriptedNetwork {
    fn connect(&self, domain: &str, policy: &PinPolicy) -> Result<Arc<dyn TransportClient>> {
        if let Some(host) = self.host_of(domain) {
            if host.behavior == Behavior::RefuseBuild {
                return Err(Error::http(format!("cannot build client for {}", domain)));
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            let built = state.builds.get(domain).copied().unwrap_or(0);
            if state.build_limits.get(domain).is_some_and(|limit| built >= *limit) {
                return Err(Error::http(format!("cannot build client for {}", domain)));
            }
            state.builds.insert(domain.to_string(), built + 1);
        }

        Ok(Arc::new(ScriptedTransport {
            domain: domain.to_string(),
            policy: policy.clone(),
            network: self.clone(),
        }))
    }
}

/// Transport bound to one scripted host
pub struct ScriptedTransport {
    domain: String,
    policy: PinPolicy,
    network: ScriptedNetwork,
}

impl ScriptedTransport {
    async fn handshake(&self) -> Result<()> {
        let Some(host) = self.network.host_of(&self.domain) else {
            return Err(Error::unreachable(&self.domain, "no such host"));
        };

        match host.behavior {
            Behavior::Reachable => self.policy.verify(&self.domain, &[host.key]),
            Behavior::Unreachable | Behavior::RefuseBuild => {
                Err(Error::unreachable(&self.domain, "connection refused"))
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::unreachable(&self.domain, "connection timed out"))
            }
        }
    }
}

#[async_trait]
impl TransportClient for ScriptedTransport {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.handshake().await?;
        self.network
            .state
            .lock()
            .unwrap()
            .requests
            .push(self.domain.clone());
        Ok(ApiResponse::new(200, format!("{}{}", self.domain, request.path)))
    }

    async fn probe(&self, _path: &str) -> Result<()> {
        self.network
            .state
            .lock()
            .unwrap()
            .probes
            .push(self.domain.clone());
        self.handshake().await
    }
}

/// DoH provider with a replaceable answer and a query counter
#[derive(Debug, Clone)]
pub struct ScriptedDohProvider {
    name: String,
    answer: Arc<Mutex<Option<Vec<String>>>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDohProvider {
    /// Provider answering with `candidates`
    pub fn answering(name: &str, candidates: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            answer: Arc::new(Mutex::new(Some(
                candidates.iter().map(|c| c.to_string()).collect(),
            ))),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Provider that always fails
    pub fn failing(name: &str) -> Self {
        let provider = Self::answering(name, &[]);
        *provider.answer.lock().unwrap() = None;
        provider
    }

    /// Delay every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Replace the answer
    pub fn set_answer(&self, candidates: &[&str]) {
        *self.answer.lock().unwrap() = Some(candidates.iter().map(|c| c.to_string()).collect());
    }

    /// Number of queries served
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn boxed(&self) -> Box<dyn DohProvider> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl DohProvider for ScriptedDohProvider {
    async fn query_txt(&self, _name: &str) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.answer
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::doh_query_failed(&self.name, "SERVFAIL"))
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}

/// Pin string for a key
pub fn pin(key: &SpkiHash) -> String {
    encode_pin(key)
}

/// Config pinning every alternate to the service key
pub fn config() -> RoutingConfig {
    let mut config = RoutingConfig::new(PRIMARY, ZONE)
        .with_doh_provider("https://doh-one.example/dns-query")
        .with_doh_provider("https://doh-two.example/dns-query")
        .with_pin("*", pin(&SERVICE_KEY));
    config.discovery.query_timeout_ms = 500;
    config.discovery.probe_timeout_ms = 300;
    config
}

/// Network with a primary that presents the service key
pub fn network(primary: Behavior) -> ScriptedNetwork {
    ScriptedNetwork::new().host(PRIMARY, primary, SERVICE_KEY)
}

/// Start an engine over the given doubles
pub async fn engine(
    config: RoutingConfig,
    providers: &[&ScriptedDohProvider],
    network: &ScriptedNetwork,
    store: Arc<dyn ProxyStore>,
) -> (RoutingEngine, mpsc::Receiver<RoutingEvent>) {
    RoutingEngine::new(
        config,
        providers.iter().map(|p| p.boxed()).collect(),
        Arc::new(network.clone()),
        store,
    )
    .await
    .expect("engine should start")
}

/// Drain every event currently queued
pub fn drain(rx: &mut mpsc::Receiver<RoutingEvent>) -> Vec<RoutingEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
