//! Routing lifecycle events
//!
//! Events are delivered over a bounded channel. A full channel drops the event
//! with a warning; routing never waits on an event consumer.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Events emitted while routing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingEvent {
    /// Startup finished on `domain`
    Started {
        domain: String,
        restored_proxy: bool,
    },

    /// A discovery cycle began
    DiscoveryStarted {
        primary: String,
    },

    /// DoH resolution finished
    CandidatesResolved {
        candidates: Vec<String>,
    },

    /// Probing one candidate failed
    ProbeFailed {
        domain: String,
        error: String,
    },

    /// A candidate's certificate did not match its pins
    PinMismatch {
        domain: String,
    },

    /// No candidate was reachable
    DiscoveryExhausted {
        primary: String,
        candidates: usize,
    },

    /// The active endpoint changed
    Switched {
        from: String,
        to: String,
        generation: u64,
    },

    /// A switch failed and the active endpoint was left unchanged
    SwitchAborted {
        domain: String,
        reason: String,
    },

    /// Routing went back to the primary domain
    RevertedToPrimary {
        from: String,
    },
}

/// Non-blocking sender for [`RoutingEvent`]s
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<RoutingEvent>>,
}

impl EventSink {
    /// Bounded sink and its receiver
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RoutingEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event without waiting
    pub fn emit(&self, event: RoutingEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    "Event channel full, dropping {:?}. Consider increasing event_channel_capacity.",
                    event
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("Event receiver dropped");
            }
        }
    }
}
