//! Failover scenario contract
//!
//! End-to-end behavior of the engine when the primary domain goes dark:
//! discovery, probing, persistence, switching and what the caller sees.

mod common;

use altroute_core::error::Error;
use altroute_core::{
    ApiRequest, DiscoveryState, MemoryProxyStore, RoutingEvent, UserFacingError,
};
use common::*;
use std::sync::Arc;

#[tokio::test]
async fn test_second_candidate_becomes_active() {
    let network = network(Behavior::Unreachable)
        .host("alt1.example", Behavior::Unreachable, SERVICE_KEY)
        .host("alt2.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example", "alt2.example"]);
    let store = MemoryProxyStore::new();

    let (engine, mut events) = engine(config(), &[&doh], &network, Arc::new(store.clone())).await;
    assert_eq!(engine.active_domain(), PRIMARY);

    let domain = engine.notify_primary_unreachable().await.unwrap();
    assert_eq!(domain, "alt2.example");

    // Probed in resolver order, stopping at the first success
    assert_eq!(network.probes(), vec!["alt1.example", "alt2.example"]);

    // Persisted as the single active record
    let records = store.snapshot().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].domain, "alt2.example");
    assert!(records[0].is_currently_active);

    assert_eq!(engine.active_domain(), "alt2.example");
    assert_eq!(engine.get_active_client().domain(), "alt2.example");
    assert_eq!(
        engine.discovery_state(),
        DiscoveryState::Switched {
            domain: "alt2.example".to_string()
        }
    );

    let response = engine.get_active_client().get("/core/v4/users").await.unwrap();
    assert_eq!(response.text(), "alt2.example/core/v4/users");

    let events = drain(&mut events);
    assert!(events.contains(&RoutingEvent::ProbeFailed {
        domain: "alt1.example".to_string(),
        error: "Domain unreachable (alt1.example): connection refused".to_string(),
    }));
    assert!(events.contains(&RoutingEvent::Switched {
        from: PRIMARY.to_string(),
        to: "alt2.example".to_string(),
        generation: 1,
    }));
}

#[tokio::test]
async fn test_empty_resolution_is_exhausted() {
    let network = network(Behavior::Unreachable);
    let doh = ScriptedDohProvider::answering("doh-one", &[]);

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;
    let before = engine.subscribe().borrow().clone();

    let err = engine.notify_primary_unreachable().await.unwrap_err();
    assert!(matches!(err, Error::DiscoveryExhausted { candidates: 0, .. }));
    assert_eq!(err.user_facing(), Some(UserFacingError::CannotReachService));

    assert_eq!(engine.discovery_state(), DiscoveryState::Exhausted);
    assert!(Arc::ptr_eq(&before, &engine.subscribe().borrow()));
    assert!(network.probes().is_empty());
}

#[tokio::test]
async fn test_all_providers_failing_is_exhausted() {
    let network = network(Behavior::Unreachable);
    let first = ScriptedDohProvider::failing("doh-one");
    let second = ScriptedDohProvider::failing("doh-two");

    let (engine, _events) =
        engine(config(), &[&first, &second], &network, Arc::new(MemoryProxyStore::new())).await;

    let err = engine.notify_primary_unreachable().await.unwrap_err();
    assert!(matches!(err, Error::DiscoveryExhausted { .. }));
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
    assert_eq!(engine.active_domain(), PRIMARY);
}

#[tokio::test]
async fn test_failing_provider_falls_through_to_next() {
    let network = network(Behavior::Unreachable).host("alt1.example", Behavior::Reachable, SERVICE_KEY);
    let first = ScriptedDohProvider::failing("doh-one");
    let second = ScriptedDohProvider::answering("doh-two", &["alt1.example"]);

    let (engine, _events) =
        engine(config(), &[&first, &second], &network, Arc::new(MemoryProxyStore::new())).await;

    assert_eq!(engine.notify_primary_unreachable().await.unwrap(), "alt1.example");
}

#[tokio::test]
async fn test_pin_mismatch_is_surfaced() {
    let network = network(Behavior::Unreachable)
        .host("alt1.example", Behavior::Reachable, ROGUE_KEY)
        .host("alt2.example", Behavior::Unreachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example", "alt2.example"]);
    let store = MemoryProxyStore::new();

    let (engine, mut events) = engine(config(), &[&doh], &network, Arc::new(store.clone())).await;

    let err = engine.notify_primary_unreachable().await.unwrap_err();
    assert!(matches!(&err, Error::PinMismatch { domain } if domain == "alt1.example"));
    assert_eq!(err.user_facing(), Some(UserFacingError::ConnectionNotTrusted));

    // Nothing about the rogue host was trusted or persisted
    assert_eq!(engine.active_domain(), PRIMARY);
    assert!(store.snapshot().await.is_empty());
    assert!(drain(&mut events).contains(&RoutingEvent::PinMismatch {
        domain: "alt1.example".to_string()
    }));
}

#[tokio::test]
async fn test_pin_mismatch_does_not_block_a_good_candidate() {
    let network = network(Behavior::Unreachable)
        .host("alt1.example", Behavior::Reachable, ROGUE_KEY)
        .host("alt2.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example", "alt2.example"]);

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;
    assert_eq!(engine.notify_primary_unreachable().await.unwrap(), "alt2.example");
}

#[tokio::test]
async fn test_unpinnable_candidates_are_never_contacted() {
    // No "*" pins and no primary pins: alternates cannot be authenticated
    let mut config = config();
    config.pins.clear();

    let network = network(Behavior::Unreachable).host("alt1.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example"]);

    let (engine, _events) = engine(config, &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;

    let err = engine.notify_primary_unreachable().await.unwrap_err();
    assert!(matches!(err, Error::DiscoveryExhausted { candidates: 1, .. }));
    assert_eq!(network.builds("alt1.example"), 0);
    assert!(network.probes().is_empty());
}

#[tokio::test]
async fn test_hanging_probe_times_out() {
    let network = network(Behavior::Unreachable)
        .host("alt1.example", Behavior::Hang, SERVICE_KEY)
        .host("alt2.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example", "alt2.example"]);

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;
    assert_eq!(engine.notify_primary_unreachable().await.unwrap(), "alt2.example");
}

#[tokio::test]
async fn test_execute_retries_once_after_discovery() {
    let network = network(Behavior::Unreachable).host("alt1.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example"]);

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;

    let response = engine.execute(ApiRequest::get("/tests/ping")).await.unwrap();
    assert!(response.is_success());
    assert_eq!(response.text(), "alt1.example/tests/ping");
    assert_eq!(doh.calls(), 1);
    assert_eq!(network.requests(), vec!["alt1.example"]);
}

#[tokio::test]
async fn test_execute_surfaces_exhaustion() {
    let network = network(Behavior::Unreachable);
    let doh = ScriptedDohProvider::answering("doh-one", &[]);

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;

    let err = engine.execute(ApiRequest::get("/users")).await.unwrap_err();
    assert!(matches!(err, Error::DiscoveryExhausted { .. }));
}

#[tokio::test]
async fn test_execute_on_healthy_primary_skips_discovery() {
    let network = network(Behavior::Reachable);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example"]);

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;

    let response = engine.execute(ApiRequest::get("/users")).await.unwrap();
    assert_eq!(response.text(), "api.example/users");
    assert_eq!(doh.calls(), 0);
    assert_eq!(engine.discovery_state(), DiscoveryState::UsingPrimary);
}

#[tokio::test]
async fn test_failing_proxy_reverts_to_primary() {
    let network = network(Behavior::Unreachable).host("alt1.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example"]);
    let store = MemoryProxyStore::new();

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(store.clone())).await;
    engine.notify_primary_unreachable().await.unwrap();

    network.set_behavior("alt1.example", Behavior::Unreachable);
    let err = engine.execute(ApiRequest::get("/users")).await.unwrap_err();
    assert!(err.is_connectivity());

    assert_eq!(engine.active_domain(), PRIMARY);
    assert_eq!(engine.discovery_state(), DiscoveryState::UsingPrimary);
    assert!(store.snapshot().await.iter().all(|r| !r.is_currently_active));
}

#[tokio::test]
async fn test_aborted_switch_rolls_back_persisted_proxy() {
    // The probe gets a client for alt1, the switch cannot build another
    let network = network(Behavior::Unreachable)
        .host("alt1.example", Behavior::Reachable, SERVICE_KEY)
        .build_limit("alt1.example", 1);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example"]);
    let store = MemoryProxyStore::new();

    let (engine, mut events) = engine(config(), &[&doh], &network, Arc::new(store.clone())).await;

    let err = engine.notify_primary_unreachable().await.unwrap_err();
    assert!(matches!(&err, Error::SwitchAborted { domain, .. } if domain == "alt1.example"));
    assert_eq!(err.to_string().matches("aborted").count(), 1, "{}", err);

    assert_eq!(engine.active_domain(), PRIMARY);
    assert_eq!(engine.proxy_cache().last_working_domain().await, None);
    assert!(store.snapshot().await.iter().all(|r| !r.is_currently_active));
    assert!(drain(&mut events).iter().any(|e| matches!(e, RoutingEvent::SwitchAborted { .. })));
}

#[tokio::test]
async fn test_disabled_alternative_routing_skips_discovery() {
    let network = network(Behavior::Unreachable).host("alt1.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example"]);

    let config = config().with_alternative_routing(false);
    let (engine, _events) = engine(config, &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;
    assert!(!engine.alternative_routing_allowed());

    let err = engine.execute(ApiRequest::get("/users")).await.unwrap_err();
    assert!(matches!(err, Error::DiscoveryExhausted { candidates: 0, .. }));
    assert_eq!(err.user_facing(), Some(UserFacingError::CannotReachService));

    assert_eq!(doh.calls(), 0);
    assert!(network.probes().is_empty());
    assert_eq!(engine.active_domain(), PRIMARY);
}

#[tokio::test]
async fn test_disabling_alternative_routing_reverts_proxy() {
    let network = network(Behavior::Unreachable).host("alt1.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &["alt1.example"]);
    let store = MemoryProxyStore::new();

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(store.clone())).await;
    engine.notify_primary_unreachable().await.unwrap();
    assert_eq!(engine.active_domain(), "alt1.example");

    engine.set_alternative_routing(false).await.unwrap();
    assert_eq!(engine.active_domain(), PRIMARY);
    assert!(store.snapshot().await.iter().all(|r| !r.is_currently_active));

    engine.set_alternative_routing(true).await.unwrap();
    assert_eq!(engine.notify_primary_unreachable().await.unwrap(), "alt1.example");
}

#[tokio::test]
async fn test_exhausted_cycle_can_be_retried() {
    let network = network(Behavior::Unreachable).host("alt1.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &[]);

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;
    assert!(engine.notify_primary_unreachable().await.is_err());

    doh.set_answer(&["alt1.example"]);
    assert_eq!(engine.notify_primary_unreachable().await.unwrap(), "alt1.example");
    assert_eq!(doh.calls(), 2);
}

#[tokio::test]
async fn test_get_client_for_other_domain() {
    let network = network(Behavior::Reachable).host("alt1.example", Behavior::Reachable, SERVICE_KEY);
    let doh = ScriptedDohProvider::answering("doh-one", &[]);

    let (engine, _events) = engine(config(), &[&doh], &network, Arc::new(MemoryProxyStore::new())).await;

    let active = engine.get_client(None).unwrap();
    assert_eq!(active.domain(), PRIMARY);
    assert!(Arc::ptr_eq(&active, &engine.get_client(Some("API.example")).unwrap()));

    let other = engine.get_client(Some("alt1.example")).unwrap();
    assert_eq!(other.domain(), "alt1.example");
    // Looking up a client does not switch
    assert_eq!(engine.active_domain(), PRIMARY);
}
