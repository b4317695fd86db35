//! Discovery and probing of alternate endpoints
//!
//! A discovery cycle moves through [`DiscoveryState`]:
//!
//! ```text
//! UsingPrimary -> Discovering -> Probing(candidate)* -> Switched(domain) | Exhausted
//! ```
//!
//! Only one cycle runs at a time. Triggers that arrive while a cycle is
//! running join it and receive its outcome. The cycle itself runs on its own
//! task, so a caller that stops waiting does not cancel it for the others.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::events::{EventSink, RoutingEvent};
use crate::proxy_cache::ProxyCache;
use crate::resolver::DohResolver;
use crate::switcher::EndpointSwitcher;
use crate::transport_factory::TransportFactory;

/// Where discovery currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryState {
    /// No discovery has run since startup or the last revert
    UsingPrimary,
    /// Asking DoH providers for candidates
    Discovering,
    /// Probing one candidate
    Probing { candidate: String },
    /// Last cycle switched to `domain`
    Switched { domain: String },
    /// Last cycle found no reachable candidate
    Exhausted,
}

/// Result of one cycle, shared by every caller that joined it
#[derive(Debug, Clone, PartialEq, Eq)]
enum DiscoveryOutcome {
    Switched(String),
    Exhausted { candidates: usize },
    PinMismatch { domain: String },
    SwitchAborted { domain: String, reason: String },
}

/// Probe timing and target
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Path requested on each candidate
    pub path: String,
    /// Upper bound for one probe, including connection setup
    pub timeout: Duration,
}

/// Orchestrates discovery when the primary domain is unreachable
#[derive(Clone)]
pub struct EndpointConfigurator {
    inner: Arc<Inner>,
}

struct Inner {
    primary: String,
    resolver: DohResolver,
    cache: Arc<ProxyCache>,
    switcher: Arc<EndpointSwitcher>,
    probe: ProbeSettings,
    state: watch::Sender<DiscoveryState>,
    in_flight: Mutex<Option<watch::Receiver<Option<DiscoveryOutcome>>>>,
    events: EventSink,
}

impl EndpointConfigurator {
    /// Create a configurator
    ///
    /// The primary domain and transport factory are taken from the switcher's
    /// registry.
    pub fn new(
        resolver: DohResolver,
        cache: Arc<ProxyCache>,
        switcher: Arc<EndpointSwitcher>,
        probe: ProbeSettings,
        events: EventSink,
    ) -> Self {
        let primary = switcher.registry().factory().pins().primary().to_string();
        let (state, _) = watch::channel(DiscoveryState::UsingPrimary);

        Self {
            inner: Arc::new(Inner {
                primary,
                resolver,
                cache,
                switcher,
                probe,
                state,
                in_flight: Mutex::new(None),
                events,
            }),
        }
    }

    /// Current discovery state
    pub fn state(&self) -> DiscoveryState {
        self.inner.state.borrow().clone()
    }

    /// Watch discovery state transitions
    pub fn watch_state(&self) -> watch::Receiver<DiscoveryState> {
        self.inner.state.subscribe()
    }

    /// Signal that the primary domain could not be reached
    ///
    /// Starts a discovery cycle, or joins the one already running, and returns
    /// the domain it switched to. Fails with [`Error::DiscoveryExhausted`] when
    /// no candidate was reachable and with [`Error::PinMismatch`] when a
    /// candidate answered with an unpinned certificate and none succeeded.
    pub async fn on_primary_unreachable(&self) -> Result<String> {
        let mut outcome_rx = {
            let mut in_flight = self.inner.in_flight.lock().await;

            match in_flight.as_ref() {
                // A closed sender means the cycle task died; start a fresh one
                Some(rx) if rx.has_changed().is_ok() => {
                    tracing::debug!("Joining in-flight discovery cycle");
                    rx.clone()
                }
                _ => {
                    let (tx, rx) = watch::channel(None);
                    *in_flight = Some(rx.clone());

                    let inner = self.inner.clone();
                    tokio::spawn(async move {
                        let outcome = inner.run_cycle().await;
                        *inner.in_flight.lock().await = None;
                        tx.send_replace(Some(outcome));
                    });
                    rx
                }
            }
        };

        let outcome = outcome_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Other("Discovery cycle ended without an outcome".to_string()))?
            .clone();

        match outcome {
            Some(outcome) => self.inner.outcome_result(outcome),
            None => Err(Error::Other("Discovery cycle ended without an outcome".to_string())),
        }
    }

    /// Record a routing change made outside a discovery cycle
    pub(crate) fn set_state(&self, state: DiscoveryState) {
        self.inner.set_state(state);
    }
}

impl Inner {
    fn factory(&self) -> &Arc<TransportFactory> {
        self.switcher.registry().factory()
    }

    fn set_state(&self, state: DiscoveryState) {
        tracing::trace!("Discovery state: {:?}", state);
        self.state.send_replace(state);
    }

    async fn run_cycle(&self) -> DiscoveryOutcome {
        tracing::info!("Primary {} unreachable, starting discovery", self.primary);
        self.set_state(DiscoveryState::Discovering);
        self.events.emit(RoutingEvent::DiscoveryStarted {
            primary: self.primary.clone(),
        });

        let candidates = self.resolver.resolve(&self.primary).await;
        self.events.emit(RoutingEvent::CandidatesResolved {
            candidates: candidates.clone(),
        });

        let mut pin_failure = None;

        for candidate in &candidates {
            self.set_state(DiscoveryState::Probing {
                candidate: candidate.clone(),
            });

            match self.probe(candidate).await {
                Ok(()) => return self.adopt(candidate).await,
                Err(Error::PinMismatch { domain }) => {
                    tracing::error!(
                        "Certificate pin mismatch for candidate {}; possible interception",
                        domain
                    );
                    self.events.emit(RoutingEvent::PinMismatch {
                        domain: domain.clone(),
                    });
                    if pin_failure.is_none() {
                        pin_failure = Some(domain);
                    }
                }
                Err(Error::UntrustedDomain(domain)) => {
                    tracing::warn!("Skipping candidate {}: no pins can authenticate it", domain);
                    self.events.emit(RoutingEvent::ProbeFailed {
                        domain,
                        error: "untrusted domain".to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Probe of {} failed: {}", candidate, e);
                    self.events.emit(RoutingEvent::ProbeFailed {
                        domain: candidate.clone(),
                        error: e.to_string(),
                    });
                }
            }

            if let Err(e) = self.factory().evict(candidate) {
                tracing::debug!("Failed to evict transport for {}: {}", candidate, e);
            }
        }

        tracing::error!(
            "Discovery exhausted for {}: {} candidate(s), none reachable",
            self.primary,
            candidates.len()
        );
        self.set_state(DiscoveryState::Exhausted);
        self.events.emit(RoutingEvent::DiscoveryExhausted {
            primary: self.primary.clone(),
            candidates: candidates.len(),
        });

        match pin_failure {
            Some(domain) => DiscoveryOutcome::PinMismatch { domain },
            None => DiscoveryOutcome::Exhausted {
                candidates: candidates.len(),
            },
        }
    }

    async fn probe(&self, candidate: &str) -> Result<()> {
        let transport = self.factory().build(candidate)?;

        match timeout(self.probe.timeout, transport.probe(&self.probe.path)).await {
            Ok(result) => result,
            Err(_) => Err(Error::unreachable(
                candidate,
                format!("probe timed out after {:?}", self.probe.timeout),
            )),
        }
    }

    async fn adopt(&self, candidate: &str) -> DiscoveryOutcome {
        tracing::info!("Candidate {} is reachable", candidate);

        let previous = self.cache.records().await;
        if let Err(e) = self.cache.record_working(candidate).await {
            tracing::error!("Failed to persist working proxy {}: {}", candidate, e);
        }

        match self.switcher.switch_to(candidate).await {
            Ok(active) => {
                self.set_state(DiscoveryState::Switched {
                    domain: active.domain.clone(),
                });
                DiscoveryOutcome::Switched(active.domain.clone())
            }
            Err(e) => {
                // The cache must not name a domain the switcher never adopted
                if let Err(restore_err) = self.cache.restore(previous).await {
                    tracing::error!(
                        "Failed to roll back proxy cache after aborted switch to {}: {}",
                        candidate,
                        restore_err
                    );
                }
                self.set_state(DiscoveryState::Exhausted);

                let reason = match e {
                    Error::SwitchAborted { reason, .. } => reason,
                    other => other.to_string(),
                };
                DiscoveryOutcome::SwitchAborted {
                    domain: candidate.to_string(),
                    reason,
                }
            }
        }
    }

    fn outcome_result(&self, outcome: DiscoveryOutcome) -> Result<String> {
        match outcome {
            DiscoveryOutcome::Switched(domain) => Ok(domain),
            DiscoveryOutcome::Exhausted { candidates } => {
                Err(Error::discovery_exhausted(&self.primary, candidates))
            }
            DiscoveryOutcome::PinMismatch { domain } => Err(Error::pin_mismatch(domain)),
            DiscoveryOutcome::SwitchAborted { domain, reason } => {
                Err(Error::switch_aborted(domain, reason))
            }
        }
    }
}

impl std::fmt::Debug for EndpointConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfigurator")
            .field("primary", &self.inner.primary)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
