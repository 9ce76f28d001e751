//! Concurrency tests for the shared monitoring state
//!
//! These tests verify that:
//! - Racing poll completions never produce two open events for one entity
//! - Event state always agrees with entity state once the dust settles
//! - Operator commands interleave safely with poll-driven transitions

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use zino::{
    events::EventFilter,
    monitors::{EntityKey, PollOutcome},
};

use crate::helpers::{daemon_state, interface, success};

const DEVICES: usize = 4;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_completions_keep_one_open_event_per_entity() {
    let state = daemon_state();

    let mut tasks = Vec::new();
    for worker in 0..8usize {
        let state = state.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..200usize {
                let device = format!("gw{}", (worker + round) % DEVICES);
                let outcome = match (worker * 7 + round) % 5 {
                    0 | 1 | 2 => PollOutcome::Failure,
                    3 => success(vec![interface(1, "ge-0/0/1", round % 2 == 0)]),
                    _ => success(vec![interface(1, "ge-0/0/1", true)]),
                };
                state.apply_poll(&device, outcome, Utc::now());
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut open_per_entity: HashMap<EntityKey, usize> = HashMap::new();
    for event in state.events.get(&EventFilter::open()) {
        *open_per_entity.entry(event.entity.clone()).or_default() += 1;
    }
    for (entity, count) in &open_per_entity {
        assert_eq!(*count, 1, "{entity} has {count} open events");
    }

    // an entity has an open event exactly when its state is degraded
    for record in state.engine.snapshot() {
        let open = state.events.open_event_for(&record.key);
        assert_eq!(
            open.is_some(),
            record.state.state.is_degraded(),
            "{} is {} but open event is {open:?}",
            record.key,
            record.state.state
        );
        if let Some(event) = open {
            assert_eq!(event.state, record.state.state);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_operator_commands_race_with_polls() {
    let state = daemon_state();
    for _ in 0..4 {
        state.apply_poll("gw1", PollOutcome::Failure, Utc::now());
    }
    let id = state
        .events
        .open_event_for(&EntityKey::reachability("gw1"))
        .unwrap()
        .id;

    let poller = {
        let state = state.clone();
        tokio::spawn(async move {
            for _ in 0..100 {
                state.apply_poll("gw1", PollOutcome::Failure, Utc::now());
                tokio::task::yield_now().await;
            }
        })
    };
    let operator = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            for i in 0..50 {
                state
                    .events
                    .ack(id, "alice", &format!("looking {i}"), Utc::now())
                    .unwrap();
                tokio::task::yield_now().await;
            }
            state.events.clear(id, "alice", Utc::now()).unwrap();
        })
    };
    poller.await.unwrap();
    operator.await.unwrap();

    let event = state.events.get_by_id(id).unwrap();
    assert!(!event.is_open());
    assert_eq!(event.ack.unwrap().note, "looking 49");

    // the device is still down; the next change would open a fresh event,
    // but repeated failures are no change at all
    assert_eq!(state.events.open_count(), 0);
}

#[test]
fn test_snapshots_taken_during_polls_are_consistent() {
    const FLEET: usize = 200;
    let state = daemon_state();

    let writers: Vec<_> = (0..2)
        .map(|writer| {
            let state = state.clone();
            std::thread::spawn(move || {
                for round in 0..6 {
                    for device in (writer..FLEET).step_by(2) {
                        let device = format!("gw{device}");
                        // four failures open an event, the success closes it again
                        for _ in 0..4 {
                            state.apply_poll(&device, PollOutcome::Failure, Utc::now());
                        }
                        if round % 2 == 1 {
                            state.apply_poll(&device, success(Vec::new()), Utc::now());
                        }
                    }
                }
            })
        })
        .collect();

    let mut checked = 0;
    while writers.iter().any(|writer| !writer.is_finished()) || checked == 0 {
        let snapshot = state.snapshot(Utc::now());
        let open: HashMap<&EntityKey, _> = snapshot
            .events
            .iter()
            .filter(|event| event.is_open())
            .map(|event| (&event.entity, event.state))
            .collect();

        for record in &snapshot.entities {
            assert_eq!(
                open.contains_key(&record.key),
                record.state.state.is_degraded(),
                "{} is {} in the snapshot, open event: {:?}",
                record.key,
                record.state.state,
                open.get(&record.key)
            );
        }
        checked += 1;
    }
    for writer in writers {
        writer.join().unwrap();
    }
    assert!(checked > 0);
}
