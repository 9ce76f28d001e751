//! Integration tests for outage and recovery handling
//!
//! These tests verify that:
//! - Transient failures below the threshold never open an event
//! - A sustained outage opens exactly one critical reachability event
//! - Recovery closes it on the first successful poll
//! - Failed sub-walks and flapping links are handled without event noise

use std::sync::Arc;
use pretty_assertions::assert_eq;
use zino::{
    actors::PollStatus,
    events::{EventFilter, EventStatus, Severity},
    monitors::{EntityKey, EntityKind, PollOutcome, StateValue},
    snmp::mock::{ScriptedBackend, ScriptedInterface},
};

use crate::helpers::{
    at, at_seconds, daemon_state, exact_settings, interface, next_poll, registry, spawn_scheduler,
    success, test_device,
};

#[tokio::test]
async fn test_outage_opens_one_event_and_recovery_closes_it() {
    let backend = Arc::new(ScriptedBackend::new());
    let (state, scheduler) = spawn_scheduler(backend.clone(), exact_settings());
    let first_poll = next_poll(&scheduler);
    scheduler
        .update_registry(registry([test_device("gw1", 5, 100)]))
        .await
        .unwrap();
    first_poll.await.unwrap();

    backend.set_responding("gw1", false);
    for _ in 0..3 {
        assert_eq!(scheduler.poll_now("gw1").await.unwrap(), PollStatus::Failed);
        assert_eq!(state.events.len(), 0);
    }

    scheduler.poll_now("gw1").await.unwrap();
    let open = state.events.get(&EventFilter::open());
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].kind, EntityKind::Reachability);
    assert_eq!(open[0].severity, Severity::Critical);
    assert_eq!(open[0].state, StateValue::Down);

    // further failures update nothing
    scheduler.poll_now("gw1").await.unwrap();
    assert_eq!(state.events.len(), 1);

    backend.set_responding("gw1", true);
    assert_eq!(scheduler.poll_now("gw1").await.unwrap(), PollStatus::Success);
    let event = state.events.get_by_id(open[0].id).unwrap();
    assert_eq!(event.status, EventStatus::Closed);
    assert!(event.closed.is_some());
    assert_eq!(event.log.len(), 2);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_interface_walk_keeps_interface_state() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_interfaces("gw1", vec![ScriptedInterface::up(1, "ge-0/0/0")]);
    let (state, scheduler) = spawn_scheduler(backend.clone(), exact_settings());

    let first_poll = next_poll(&scheduler);
    scheduler
        .update_registry(registry([test_device("gw1", 5, 100)]))
        .await
        .unwrap();
    first_poll.await.unwrap();

    let key = EntityKey::interface("gw1", 1);
    assert_eq!(state.engine.get(&key).unwrap().state, StateValue::Up);

    backend.fail_walks("gw1", true);
    assert_eq!(scheduler.poll_now("gw1").await.unwrap(), PollStatus::Success);

    let entity = state.engine.get(&key).unwrap();
    assert_eq!(entity.state, StateValue::Up);
    assert!(entity.missing_since.is_none());
    assert_eq!(
        state.engine.get(&EntityKey::reachability("gw1")).unwrap().state,
        StateValue::Up
    );
    assert!(state.events.is_empty());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_interface_down_opens_major_event() {
    let backend = Arc::new(ScriptedBackend::new());
    backend.set_interfaces("gw1", vec![ScriptedInterface::up(7, "xe-1/0/7")]);
    let (state, scheduler) = spawn_scheduler(backend.clone(), exact_settings());

    let first_poll = next_poll(&scheduler);
    scheduler
        .update_registry(registry([test_device("gw1", 5, 100)]))
        .await
        .unwrap();
    first_poll.await.unwrap();

    backend.set_interfaces("gw1", vec![ScriptedInterface::down(7, "xe-1/0/7")]);
    scheduler.poll_now("gw1").await.unwrap();

    let open = state.events.get(&EventFilter::open());
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].entity, EntityKey::interface("gw1", 7));
    assert_eq!(open[0].severity, Severity::Major);
    assert_eq!(open[0].description.as_deref(), Some("xe-1/0/7"));

    backend.set_interfaces("gw1", vec![ScriptedInterface::up(7, "xe-1/0/7")]);
    scheduler.poll_now("gw1").await.unwrap();
    assert_eq!(state.events.open_count(), 0);

    scheduler.shutdown().await.unwrap();
}

#[test]
fn test_flapping_interface_stops_producing_events() {
    let state = daemon_state();
    let key = EntityKey::interface("gw1", 3);

    // one flip every 30 seconds, well inside the flap window
    let mut events_when_flapping = None;
    for step in 0..12 {
        let up = step % 2 == 0;
        state.apply_poll("gw1", success(vec![interface(3, "ge-0/0/3", up)]), at_seconds(step * 30));
        if events_when_flapping.is_none()
            && state.engine.get(&key).unwrap().state == StateValue::Flapping
        {
            events_when_flapping = Some(state.events.len());
        }
    }

    let events_when_flapping = events_when_flapping.expect("link never reached flapping");
    assert_eq!(state.events.len(), events_when_flapping);
    let open = state.events.get(&EventFilter::open());
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].state, StateValue::Flapping);
    assert_eq!(open[0].severity, Severity::Warning);

    // after a quiet window the link settles into its last observed state
    let settled = state.age_flapping(at(30));
    assert_eq!(settled, 1);
    assert_eq!(state.engine.get(&key).unwrap().state, StateValue::Down);
    let event = state.events.get_by_id(open[0].id).unwrap();
    assert!(event.is_open());
    assert_eq!(event.state, StateValue::Down);
}

#[test]
fn test_interrupted_failures_never_open_an_event() {
    let state = daemon_state();
    for round in 0..10 {
        for minute in 0..3 {
            state.apply_poll("gw1", PollOutcome::Failure, at(round * 4 + minute));
        }
        state.apply_poll("gw1", success(Vec::new()), at(round * 4 + 3));
    }
    assert!(state.events.is_empty());
}
